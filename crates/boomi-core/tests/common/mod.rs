#![allow(dead_code)]

use std::path::{Path, PathBuf};

use anyhow::Result;
use boomi_core::db::{DbPool, Dialect};
use boomi_core::{JobContext, JobOptions};
use chrono::NaiveDateTime;
use sqlx::any::AnyPoolOptions;
use sqlx::Row as _;

pub fn run<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Runtime::new().unwrap().block_on(future)
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../boomi-parser/tests/data")
        .join(name)
}

/// Copies a fixture under `root/relative`, creating parent directories.
pub fn stage_fixture(root: &Path, name: &str, relative: &str) -> Result<PathBuf> {
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(fixture(name), &target)?;
    Ok(target)
}

pub fn now() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2018-05-15 09:30:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Options with every file store under `root` and the given engines.
pub fn options(root: &Path, engines: &[&str]) -> JobOptions {
    let mut options = JobOptions::new(now()).with_file_root(root);
    options.engines = engines.iter().map(|name| name.to_string()).collect();
    options
}

pub async fn sqlite_pool() -> Result<DbPool> {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Context whose engines are fresh in-memory SQLite databases, each set up
/// with `schema`.
pub async fn sqlite_context(
    options: JobOptions,
    schema: &[&str],
) -> Result<(JobContext, Vec<DbPool>)> {
    let names = options.engines.clone();
    let ctx = JobContext::new(options)?;
    let mut pools = Vec::with_capacity(names.len());
    for name in &names {
        let pool = sqlite_pool().await?;
        for statement in schema {
            sqlx::query(statement).execute(&pool).await?;
        }
        ctx.engines().register(name, Dialect::Sqlite, pool.clone()).await;
        pools.push(pool);
    }
    Ok((ctx, pools))
}

/// Every row of `sql` rendered as text, columns joined with `|`.
pub async fn dump(pool: &DbPool, sql: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::new();
        for idx in 0..row.len() {
            let cell: Option<String> = row.try_get(idx)?;
            cells.push(cell.unwrap_or_else(|| "NULL".to_string()));
        }
        lines.push(cells.join("|"));
    }
    Ok(lines)
}

pub async fn count(pool: &DbPool, table: &str) -> Result<i64> {
    let row = sqlx::query(&format!("SELECT COUNT(1) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(row.try_get(0)?)
}
