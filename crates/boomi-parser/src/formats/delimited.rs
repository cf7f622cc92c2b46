use std::io::Cursor;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};

use super::text::{normalize_column_name, UTF8_BOM};
use crate::errors::ParserError;
use crate::model::{Row, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSpec {
    /// Field names declared by the job; every line is data.
    Fixed(Vec<String>),
    /// Field names come from the first line after the preamble.
    Header,
}

#[derive(Debug, Clone)]
pub struct DelimitedFormat {
    pub delimiter: u8,
    pub fields: FieldSpec,
    pub skip_rows: usize,
    pub normalize_headers: bool,
    pub strip_bom: bool,
    /// Accept records whose length differs from the field list: short ones
    /// are padded with nulls, long ones truncated.
    pub flexible: bool,
}

impl DelimitedFormat {
    pub fn csv() -> Self {
        Self {
            delimiter: b',',
            fields: FieldSpec::Header,
            skip_rows: 0,
            normalize_headers: false,
            strip_bom: true,
            flexible: true,
        }
    }

    pub fn fixed(delimiter: u8, fields: &[&str]) -> Self {
        Self {
            delimiter,
            fields: FieldSpec::Fixed(fields.iter().map(|field| field.to_string()).collect()),
            skip_rows: 0,
            normalize_headers: false,
            strip_bom: true,
            flexible: true,
        }
    }

    /// Every record must have exactly as many fields as the field list.
    pub fn strict(mut self) -> Self {
        self.flexible = false;
        self
    }

    pub fn with_skip_rows(mut self, skip_rows: usize) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    pub fn with_normalized_headers(mut self) -> Self {
        self.normalize_headers = true;
        self
    }
}

/// Lazily yields rows from an owned buffer of delimited text.
pub struct DelimitedRows {
    records: StringRecordsIntoIter<Cursor<Vec<u8>>>,
    fields: Vec<String>,
    flexible: bool,
}

impl DelimitedRows {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn to_row(&self, record: &StringRecord) -> Row {
        let mut row = Row::with_capacity(self.fields.len());
        for (idx, field) in self.fields.iter().enumerate() {
            let value = record
                .get(idx)
                .map(|raw| Value::Text(raw.to_string()))
                .unwrap_or(Value::Null);
            row.set(field.as_str(), value);
        }
        row
    }
}

impl Iterator for DelimitedRows {
    type Item = Result<Row, ParserError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(err) => return Some(Err(ParserError::csv(err))),
        };
        if !self.flexible && record.len() != self.fields.len() {
            return Some(Err(ParserError::FieldCount {
                line: record.position().map_or(0, |position| position.line()),
                expected: self.fields.len(),
                found: record.len(),
            }));
        }
        Some(Ok(self.to_row(&record)))
    }
}

impl std::fmt::Debug for DelimitedRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelimitedRows")
            .field("fields", &self.fields)
            .finish()
    }
}

pub fn read_delimited(
    mut bytes: Vec<u8>,
    format: &DelimitedFormat,
) -> Result<DelimitedRows, ParserError> {
    if format.strip_bom && bytes.starts_with(UTF8_BOM) {
        bytes.drain(..UTF8_BOM.len());
    }

    let mut records = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(format.delimiter)
        .from_reader(Cursor::new(bytes))
        .into_records();

    for _ in 0..format.skip_rows {
        if let Some(Err(err)) = records.next() {
            return Err(ParserError::csv(err));
        }
    }

    let fields = match &format.fields {
        FieldSpec::Fixed(fields) => fields.clone(),
        FieldSpec::Header => {
            let header = records
                .next()
                .ok_or_else(|| ParserError::EmptyInput {
                    what: "delimited input".to_string(),
                })?
                .map_err(ParserError::csv)?;
            header
                .iter()
                .map(|name| {
                    if format.normalize_headers {
                        normalize_column_name(name)
                    } else {
                        name.to_string()
                    }
                })
                .collect()
        }
    };

    Ok(DelimitedRows {
        records,
        fields,
        flexible: format.flexible,
    })
}
