// crates/boomi-core/src/db/mod.rs
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{PipelineError, Result};

pub type DbPool = AnyPool;

/// SQL flavour of an engine, taken from its connection URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(PipelineError::Config(format!(
                "unsupported database scheme '{other}'"
            ))),
        }
    }

    /// Renders `expr` as text. The `Any` driver cannot decode DATE or
    /// NUMERIC columns, so queries read them through this.
    pub fn cast_text(self, expr: &str) -> String {
        match self {
            Dialect::MySql => format!("CAST({expr} AS CHAR)"),
            Dialect::Postgres | Dialect::Sqlite => format!("CAST({expr} AS TEXT)"),
        }
    }
}

/// A connected engine. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Engine {
    pub name: String,
    pub dialect: Dialect,
    pub pool: DbPool,
}

/// Establish a connection pool for any supported DSN.
pub async fn connect(database_url: &str) -> Result<DbPool> {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Named engines, connected on first use.
#[derive(Debug)]
pub struct EngineRegistry {
    urls: BTreeMap<String, String>,
    connected: Mutex<HashMap<String, Engine>>,
}

impl EngineRegistry {
    pub fn new(urls: BTreeMap<String, String>) -> Self {
        Self {
            urls,
            connected: Mutex::new(HashMap::new()),
        }
    }

    pub async fn engine(&self, name: &str) -> Result<Engine> {
        let mut connected = self.connected.lock().await;
        if let Some(engine) = connected.get(name) {
            return Ok(engine.clone());
        }
        let url = self
            .urls
            .get(name)
            .ok_or_else(|| PipelineError::UnknownEngine(name.to_string()))?;
        let dialect = Dialect::from_url(url)?;
        let pool = connect(url).await?;
        info!(engine = name, ?dialect, "connected");
        let engine = Engine {
            name: name.to_string(),
            dialect,
            pool,
        };
        connected.insert(name.to_string(), engine.clone());
        Ok(engine)
    }

    /// Registers an already-open pool under `name`.
    pub async fn register(&self, name: &str, dialect: Dialect, pool: DbPool) {
        self.connected.lock().await.insert(
            name.to_string(),
            Engine {
                name: name.to_string(),
                dialect,
                pool,
            },
        );
    }
}
