// crates/boomi-core/src/source.rs
use async_trait::async_trait;
use boomi_parser::{
    decode_latin1, read_delimited, read_json_records, split_lines, DelimitedFormat, ParserError,
    Row, Value,
};
use sqlx::any::AnyRow;
use sqlx::{Column, Row as _};
use tracing::{debug, info};

use crate::context::JobContext;
use crate::db::Dialect;
use crate::error::{PipelineError, Result};
use crate::files::FileStore;
use crate::http::HttpClient;

pub type RowStream = Box<dyn Iterator<Item = std::result::Result<Row, ParserError>> + Send>;

/// Producer of the rows a pipeline consumes.
#[async_trait]
pub trait Source: Send {
    fn name(&self) -> String;

    /// Fields every row must carry; checked against the first row.
    fn required_fields(&self) -> &[String] {
        &[]
    }

    async fn open(&mut self, ctx: &JobContext) -> Result<RowStream>;
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|field| field.to_string()).collect()
}

fn rows_stream(rows: Vec<Row>) -> RowStream {
    Box::new(rows.into_iter().map(Ok))
}

/// CSV report fetched over HTTP; the header row names the fields.
pub struct HttpReportSource {
    client: HttpClient,
    url: String,
    format: DelimitedFormat,
    required: Vec<String>,
}

impl HttpReportSource {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            format: DelimitedFormat::csv(),
            required: Vec::new(),
        }
    }

    pub fn requiring(mut self, fields: &[&str]) -> Self {
        self.required = owned(fields);
        self
    }
}

#[async_trait]
impl Source for HttpReportSource {
    fn name(&self) -> String {
        self.url.clone()
    }

    fn required_fields(&self) -> &[String] {
        &self.required
    }

    async fn open(&mut self, _ctx: &JobContext) -> Result<RowStream> {
        let body = self.client.get_bytes(&self.url).await?;
        let rows = read_delimited(body, &self.format)
            .map_err(|err| PipelineError::parse(self.url.clone(), err))?;
        Ok(Box::new(rows))
    }
}

/// JSON document fetched over HTTP with its rows under one key.
pub struct HttpRecordsSource {
    client: HttpClient,
    url: String,
    key: String,
    required: Vec<String>,
}

impl HttpRecordsSource {
    pub fn new(client: HttpClient, url: impl Into<String>, key: &str) -> Self {
        Self {
            client,
            url: url.into(),
            key: key.to_string(),
            required: Vec::new(),
        }
    }

    pub fn requiring(mut self, fields: &[&str]) -> Self {
        self.required = owned(fields);
        self
    }
}

#[async_trait]
impl Source for HttpRecordsSource {
    fn name(&self) -> String {
        self.url.clone()
    }

    fn required_fields(&self) -> &[String] {
        &self.required
    }

    async fn open(&mut self, _ctx: &JobContext) -> Result<RowStream> {
        let body = self.client.get_bytes(&self.url).await?;
        let rows = read_json_records(&body, &self.key)
            .map_err(|err| PipelineError::parse(self.url.clone(), err))?;
        debug!(url = %self.url, rows = rows.len(), "records fetched");
        Ok(rows_stream(rows))
    }
}

#[derive(Debug, Clone)]
pub enum FileFormat {
    Delimited(DelimitedFormat),
    /// ISO-8859-1 text split on a fixed end-of-line marker, then on a
    /// single-character delimiter into the listed fields.
    Latin1Lines {
        eol: String,
        delimiter: char,
        fields: Vec<String>,
    },
}

impl FileFormat {
    pub fn latin1_lines(eol: &str, delimiter: char, fields: &[&str]) -> Self {
        FileFormat::Latin1Lines {
            eol: eol.to_string(),
            delimiter,
            fields: owned(fields),
        }
    }
}

pub struct FileSource {
    store: FileStore,
    path: String,
    format: FileFormat,
    required: Vec<String>,
}

impl FileSource {
    pub fn new(store: FileStore, path: impl Into<String>, format: FileFormat) -> Self {
        Self {
            store,
            path: path.into(),
            format,
            required: Vec::new(),
        }
    }

    pub fn delimited(store: FileStore, path: impl Into<String>, format: DelimitedFormat) -> Self {
        Self::new(store, path, FileFormat::Delimited(format))
    }

    pub fn requiring(mut self, fields: &[&str]) -> Self {
        self.required = owned(fields);
        self
    }
}

fn split_latin1(bytes: &[u8], eol: &str, delimiter: char, fields: &[String]) -> Vec<Row> {
    let text = decode_latin1(bytes);
    split_lines(&text, eol)
        .into_iter()
        .map(|line| {
            let mut parts = line.split(delimiter);
            let mut row = Row::with_capacity(fields.len());
            for field in fields {
                let value = parts
                    .next()
                    .map(|part| Value::Text(part.to_string()))
                    .unwrap_or(Value::Null);
                row.set(field.as_str(), value);
            }
            row
        })
        .collect()
}

#[async_trait]
impl Source for FileSource {
    fn name(&self) -> String {
        format!("{}:{}", self.store.name(), self.path)
    }

    fn required_fields(&self) -> &[String] {
        &self.required
    }

    async fn open(&mut self, _ctx: &JobContext) -> Result<RowStream> {
        let bytes = self.store.read(&self.path).await?;
        match &self.format {
            FileFormat::Delimited(format) => {
                let rows = read_delimited(bytes, format)
                    .map_err(|err| PipelineError::parse(self.name(), err))?;
                Ok(Box::new(rows))
            }
            FileFormat::Latin1Lines {
                eol,
                delimiter,
                fields,
            } => Ok(rows_stream(split_latin1(&bytes, eol, *delimiter, fields))),
        }
    }
}

type QueryBuilder = dyn Fn(Dialect) -> String + Send;

/// Query against a named engine. The SQL is built per dialect.
pub struct SqlSource {
    engine: String,
    query: Box<QueryBuilder>,
}

impl SqlSource {
    pub fn new<F>(engine: impl Into<String>, query: F) -> Self
    where
        F: Fn(Dialect) -> String + Send + 'static,
    {
        Self {
            engine: engine.into(),
            query: Box::new(query),
        }
    }
}

fn decode_column(row: &AnyRow, idx: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(idx) {
        return value.into();
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(idx) {
        return value.into();
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(idx) {
        return value.into();
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(idx) {
        return value.into();
    }
    Value::Null
}

fn to_row(row: &AnyRow) -> Row {
    let mut out = Row::with_capacity(row.columns().len());
    for column in row.columns() {
        out.set(column.name(), decode_column(row, column.ordinal()));
    }
    out
}

#[async_trait]
impl Source for SqlSource {
    fn name(&self) -> String {
        format!("sql:{}", self.engine)
    }

    async fn open(&mut self, ctx: &JobContext) -> Result<RowStream> {
        let engine = ctx.engine(&self.engine).await?;
        let sql = (self.query)(engine.dialect);
        let rows = sqlx::query(&sql).fetch_all(&engine.pool).await?;
        info!(engine = %self.engine, rows = rows.len(), "query returned");
        Ok(rows_stream(rows.iter().map(to_row).collect()))
    }
}

/// Rows already in memory.
pub struct MemorySource {
    name: String,
    rows: Option<Vec<Row>>,
    required: Vec<String>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows: Some(rows),
            required: Vec::new(),
        }
    }

    pub fn requiring(mut self, fields: &[&str]) -> Self {
        self.required = owned(fields);
        self
    }
}

#[async_trait]
impl Source for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn required_fields(&self) -> &[String] {
        &self.required
    }

    async fn open(&mut self, _ctx: &JobContext) -> Result<RowStream> {
        Ok(rows_stream(self.rows.take().unwrap_or_default()))
    }
}

/// Several sources read back to back as one stream.
pub struct ConcatSource {
    name: String,
    sources: Vec<Box<dyn Source>>,
    limit_each: Option<usize>,
}

impl ConcatSource {
    pub fn new(name: impl Into<String>, sources: Vec<Box<dyn Source>>) -> Self {
        Self {
            name: name.into(),
            sources,
            limit_each: None,
        }
    }

    /// Caps the records taken from each source rather than from the whole.
    pub fn limit_each(mut self, limit: Option<usize>) -> Self {
        self.limit_each = limit;
        self
    }
}

#[async_trait]
impl Source for ConcatSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn open(&mut self, ctx: &JobContext) -> Result<RowStream> {
        let mut streams = Vec::with_capacity(self.sources.len());
        for source in &mut self.sources {
            let stream = open_checked(source.as_mut(), ctx).await?;
            streams.push(match self.limit_each {
                Some(limit) => Box::new(stream.take(limit)) as RowStream,
                None => stream,
            });
        }
        Ok(Box::new(streams.into_iter().flatten()))
    }
}

/// Opens `source` and verifies its first row carries every required field.
pub async fn open_checked(source: &mut dyn Source, ctx: &JobContext) -> Result<RowStream> {
    let mut stream = source.open(ctx).await?;
    let required = source.required_fields();
    if required.is_empty() {
        return Ok(stream);
    }
    let first = match stream.next() {
        None => return Ok(stream),
        Some(Err(err)) => return Err(PipelineError::parse(source.name(), err)),
        Some(Ok(row)) => row,
    };
    let missing: Vec<String> = required
        .iter()
        .filter(|field| !first.contains(field))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::SchemaDrift {
            source_name: source.name(),
            missing,
        });
    }
    Ok(Box::new(std::iter::once(Ok(first)).chain(stream)))
}

/// Reads a whole source into memory, with the same schema check.
pub async fn materialize(source: &mut dyn Source, ctx: &JobContext) -> Result<Vec<Row>> {
    let name = source.name();
    open_checked(source, ctx)
        .await?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| PipelineError::parse(name, err))
}
