use crate::errors::ParserError;
use crate::model::{Row, Value};

/// Rows from the array stored under `key` in a JSON object response.
pub fn read_json_records(bytes: &[u8], key: &str) -> Result<Vec<Row>, ParserError> {
    let document: serde_json::Value = serde_json::from_slice(bytes)?;
    let records = document
        .get(key)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ParserError::MissingRecordsKey {
            key: key.to_string(),
        })?;

    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let object = record.as_object().ok_or(ParserError::RecordShape {
                index,
                found: json_kind(record),
            })?;
            let mut row = Row::with_capacity(object.len());
            for (field, value) in object {
                row.set(field.as_str(), Value::from_json(value));
            }
            Ok(row)
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
