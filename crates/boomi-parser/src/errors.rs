use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("CSV error at line {line}: {source}")]
    Csv {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response has no '{key}' array")]
    MissingRecordsKey { key: String },

    #[error("record {index} is a {found}, expected an object")]
    RecordShape { index: usize, found: &'static str },

    #[error("line {line} has {found} fields, expected {expected}")]
    FieldCount {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("{what} did not contain a header row")]
    EmptyInput { what: String },
}

impl ParserError {
    pub(crate) fn csv(source: csv::Error) -> Self {
        let line = source
            .position()
            .map(|position| position.line())
            .unwrap_or_default();
        ParserError::Csv { line, source }
    }
}
