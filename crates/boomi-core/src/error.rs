// crates/boomi-core/src/error.rs
use boomi_parser::ParserError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("File I/O error on {path}: {error}")]
    File {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Record parsing failed in {source_name}: {error}")]
    Parse {
        source_name: String,
        #[source]
        error: ParserError,
    },

    #[error("Schema drift in {source_name}: missing field(s) {missing:?}")]
    SchemaDrift {
        source_name: String,
        missing: Vec<String>,
    },

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV writing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Engine '{0}' has no connection URL configured")]
    UnknownEngine(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn parse(source_name: impl Into<String>, error: ParserError) -> Self {
        PipelineError::Parse {
            source_name: source_name.into(),
            error,
        }
    }

    pub fn file(path: impl Into<String>, error: std::io::Error) -> Self {
        PipelineError::File {
            path: path.into(),
            error,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
