// crates/boomi-core/src/sink.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use boomi_parser::Row;
use serde::Serialize;
use sqlx::error::DatabaseError;
use sqlx::AnyConnection;
use tracing::{debug, error, info, warn};

use crate::context::{ErrorChannel, SoftError, SoftErrorKind};
use crate::db::{Dialect, Engine};
use crate::error::{PipelineError, Result};
use crate::files::FileStore;
use crate::http::HttpClient;
use crate::upsert;

pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// A row a sink refused. Only that sink is affected.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub identity: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SinkStats {
    pub sink: String,
    pub written: usize,
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    pub failed: bool,
    pub error: Option<String>,
}

impl SinkStats {
    pub fn named(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            ..Self::default()
        }
    }

    fn record(&mut self, upserted: Upserted) {
        self.written += 1;
        match upserted {
            Upserted::Inserted => self.inserted += 1,
            Upserted::Updated => self.updated += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Updated,
}

/// Destination of pipeline rows.
///
/// `Err` from `write`, `flush` or `close` means the destination itself is
/// unusable; a bad row is reported through the returned `Rejected` list.
#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> String;

    /// Rows rejected as a consequence of this write, including rows of a
    /// batch flushed because the buffer filled up.
    async fn write(&mut self, row: &Row) -> Result<Vec<Rejected>>;

    async fn flush(&mut self) -> Result<Vec<Rejected>> {
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> SinkStats;
}

fn identity_of(discriminant: &[String], row: &Row) -> String {
    discriminant
        .iter()
        .map(|field| row.text(field))
        .collect::<Vec<_>>()
        .join("|")
}

fn missing_discriminant<'a>(discriminant: &'a [String], row: &Row) -> Option<&'a str> {
    discriminant
        .iter()
        .find(|field| row.get(field).map_or(true, |value| value.is_blank()))
        .map(String::as_str)
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|field| field.to_string()).collect()
}

/// Row-level failures (constraint, type) as opposed to a lost connection or
/// a target that does not match the rows at all.
fn is_row_level(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => !is_undefined_target(db.as_ref()),
        sqlx::Error::Encode(_) => true,
        _ => false,
    }
}

/// Missing table or column: Postgres `42P01`/`42703`, MySQL `42S02`/`42S22`,
/// SQLite by message.
fn is_undefined_target(err: &dyn DatabaseError) -> bool {
    const UNDEFINED: [&str; 4] = ["42P01", "42703", "42S02", "42S22"];
    if err
        .code()
        .is_some_and(|code| UNDEFINED.contains(&code.as_ref()))
    {
        return true;
    }
    let message = err.message();
    ["no such table", "no such column", "has no column named"]
        .iter()
        .any(|needle| message.contains(needle))
}

async fn upsert_row(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
    discriminant: &[String],
    row: &Row,
) -> std::result::Result<Upserted, sqlx::Error> {
    let existing = upsert::select_existing(dialect, table, discriminant, row);
    let found = existing.query().fetch_optional(&mut *conn).await?.is_some();
    if found {
        if let Some(update) = upsert::update(dialect, table, discriminant, row) {
            update.query().execute(&mut *conn).await?;
        }
        Ok(Upserted::Updated)
    } else {
        let insert = upsert::insert(dialect, table, row);
        insert.query().execute(&mut *conn).await?;
        Ok(Upserted::Inserted)
    }
}

/// Insert-or-update by discriminant against one table of one engine.
pub struct SqlSink {
    engine: Engine,
    table: String,
    discriminant: Vec<String>,
    buffer_size: usize,
    buffer: Vec<Row>,
    stats: SinkStats,
}

impl SqlSink {
    pub fn new(engine: Engine, table: &str, discriminant: &[&str], buffer_size: usize) -> Self {
        let stats = SinkStats::named(format!("{}:{}", engine.name, table));
        Self {
            engine,
            table: table.to_string(),
            discriminant: owned(discriminant),
            buffer_size: buffer_size.max(1),
            buffer: Vec::new(),
            stats,
        }
    }

    /// Applies `rows` in one transaction, rolling back on the first error.
    async fn apply_batch(&self, rows: &[Row]) -> std::result::Result<Vec<Upserted>, sqlx::Error> {
        let mut tx = self.engine.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let dialect = self.engine.dialect;
            match upsert_row(&mut tx, dialect, &self.table, &self.discriminant, row).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(sink = %self.stats.sink, error = %rollback, "rollback failed");
                    }
                    return Err(err);
                }
            }
        }
        tx.commit().await?;
        Ok(outcomes)
    }
}

#[async_trait]
impl Sink for SqlSink {
    fn name(&self) -> String {
        self.stats.sink.clone()
    }

    async fn write(&mut self, row: &Row) -> Result<Vec<Rejected>> {
        if let Some(field) = missing_discriminant(&self.discriminant, row) {
            self.stats.rejected += 1;
            return Ok(vec![Rejected {
                identity: identity_of(&self.discriminant, row),
                reason: format!("missing discriminant field '{field}'"),
            }]);
        }
        self.buffer.push(row.clone());
        if self.buffer.len() >= self.buffer_size {
            return self.flush().await;
        }
        Ok(Vec::new())
    }

    async fn flush(&mut self) -> Result<Vec<Rejected>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let batch = std::mem::take(&mut self.buffer);
        match self.apply_batch(&batch).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    self.stats.record(outcome);
                }
                debug!(sink = %self.stats.sink, rows = batch.len(), "batch committed");
                Ok(Vec::new())
            }
            Err(err) if is_row_level(&err) => {
                warn!(
                    sink = %self.stats.sink,
                    rows = batch.len(),
                    error = %err,
                    "batch rolled back, replaying rows individually"
                );
                let mut rejected = Vec::new();
                for row in &batch {
                    match self.apply_batch(std::slice::from_ref(row)).await {
                        Ok(outcomes) => {
                            for outcome in outcomes {
                                self.stats.record(outcome);
                            }
                        }
                        Err(err) if is_row_level(&err) => {
                            self.stats.rejected += 1;
                            rejected.push(Rejected {
                                identity: identity_of(&self.discriminant, row),
                                reason: err.to_string(),
                            });
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Ok(rejected)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        Ok(())
    }

    fn stats(&self) -> SinkStats {
        self.stats.clone()
    }
}

/// Delimited file replaced in full on close, one row per discriminant.
/// Without a discriminant the whole row is the key, so repeated rows
/// collapse to one line.
pub struct FileSink {
    store: FileStore,
    path: String,
    delimiter: u8,
    header: bool,
    discriminant: Vec<String>,
    rows: Vec<Row>,
    index: HashMap<String, usize>,
    stats: SinkStats,
}

impl FileSink {
    pub fn new(store: FileStore, path: impl Into<String>) -> Self {
        let path = path.into();
        let stats = SinkStats::named(format!("{}:{}", store.name(), path));
        Self {
            store,
            path,
            delimiter: b'\t',
            header: false,
            discriminant: Vec::new(),
            rows: Vec::new(),
            index: HashMap::new(),
            stats,
        }
    }

    pub fn with_header(mut self) -> Self {
        self.header = true;
        self
    }

    pub fn keyed_by(mut self, discriminant: &[&str]) -> Self {
        self.discriminant = owned(discriminant);
        self
    }

    pub fn discriminant(&self) -> &[String] {
        &self.discriminant
    }

    fn key(&self, row: &Row) -> Result<String> {
        if self.discriminant.is_empty() {
            Ok(serde_json::to_string(row)?)
        } else {
            Ok(identity_of(&self.discriminant, row))
        }
    }

    fn render(&self) -> Result<Vec<u8>> {
        let header: Vec<String> = self
            .rows
            .first()
            .map(|row| row.fields().map(str::to_string).collect())
            .unwrap_or_default();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        if self.header && !header.is_empty() {
            writer.write_record(&header)?;
        }
        for row in &self.rows {
            writer.write_record(header.iter().map(|field| row.text(field)))?;
        }
        writer
            .into_inner()
            .map_err(|err| PipelineError::Io(err.into_error()))
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> String {
        self.stats.sink.clone()
    }

    async fn write(&mut self, row: &Row) -> Result<Vec<Rejected>> {
        let key = self.key(row)?;
        match self.index.get(&key) {
            Some(&idx) => self.rows[idx] = row.clone(),
            None => {
                self.index.insert(key, self.rows.len());
                self.rows.push(row.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<()> {
        let bytes = self.render()?;
        self.store.write(&self.path, &bytes).await?;
        self.stats.written = self.rows.len();
        info!(sink = %self.stats.sink, rows = self.rows.len(), "file replaced");
        Ok(())
    }

    fn stats(&self) -> SinkStats {
        self.stats.clone()
    }
}

/// Posts each row as a JSON document to a ticketing endpoint.
pub struct TicketSink {
    client: HttpClient,
    url: String,
    stats: SinkStats,
}

impl TicketSink {
    pub fn new(client: HttpClient, url: String) -> Self {
        let stats = SinkStats::named(format!("tickets:{url}"));
        Self { client, url, stats }
    }
}

#[async_trait]
impl Sink for TicketSink {
    fn name(&self) -> String {
        self.stats.sink.clone()
    }

    async fn write(&mut self, row: &Row) -> Result<Vec<Rejected>> {
        let body = serde_json::to_value(row)?;
        let response = self.client.post_json(&self.url, &body).await?;
        if let Some(records) = response.get("records").and_then(|value| value.as_array()) {
            for record in records {
                info!(sink = %self.stats.sink, %record, "ticket recorded");
            }
        }
        self.stats.written += 1;
        self.stats.inserted += 1;
        Ok(Vec::new())
    }

    fn stats(&self) -> SinkStats {
        self.stats.clone()
    }
}

/// Shared handle onto the rows held by a [`MemorySink`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl MemoryTable {
    pub fn rows(&self) -> Vec<Row> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upsert(&self, discriminant: &[String], row: &Row) -> Upserted {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = rows.iter_mut().find(|candidate| {
            discriminant
                .iter()
                .all(|field| candidate.get(field) == row.get(field))
        });
        match existing {
            Some(existing) => {
                for (field, value) in row.iter() {
                    existing.set(field, value.clone());
                }
                Upserted::Updated
            }
            None => {
                rows.push(row.clone());
                Upserted::Inserted
            }
        }
    }
}

/// In-memory keyed table with the same upsert semantics as [`SqlSink`].
pub struct MemorySink {
    table: MemoryTable,
    discriminant: Vec<String>,
    stats: SinkStats,
}

impl MemorySink {
    pub fn new(name: impl Into<String>, table: MemoryTable, discriminant: &[&str]) -> Self {
        Self {
            table,
            discriminant: owned(discriminant),
            stats: SinkStats::named(name),
        }
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> String {
        self.stats.sink.clone()
    }

    async fn write(&mut self, row: &Row) -> Result<Vec<Rejected>> {
        if let Some(field) = missing_discriminant(&self.discriminant, row) {
            self.stats.rejected += 1;
            return Ok(vec![Rejected {
                identity: identity_of(&self.discriminant, row),
                reason: format!("missing discriminant field '{field}'"),
            }]);
        }
        let outcome = self.table.upsert(&self.discriminant, row);
        self.stats.record(outcome);
        Ok(Vec::new())
    }

    fn stats(&self) -> SinkStats {
        self.stats.clone()
    }
}

/// Stands in for a real sink on `--dry-run`: validates and logs.
pub struct DryRunSink {
    discriminant: Vec<String>,
    stats: SinkStats,
}

impl DryRunSink {
    pub fn new(name: impl Into<String>, discriminant: Vec<String>) -> Self {
        Self {
            discriminant,
            stats: SinkStats::named(name),
        }
    }

    pub fn keyed(name: impl Into<String>, discriminant: &[&str]) -> Self {
        Self::new(name, owned(discriminant))
    }
}

#[async_trait]
impl Sink for DryRunSink {
    fn name(&self) -> String {
        self.stats.sink.clone()
    }

    async fn write(&mut self, row: &Row) -> Result<Vec<Rejected>> {
        if let Some(field) = missing_discriminant(&self.discriminant, row) {
            self.stats.rejected += 1;
            return Ok(vec![Rejected {
                identity: identity_of(&self.discriminant, row),
                reason: format!("missing discriminant field '{field}'"),
            }]);
        }
        debug!(sink = %self.stats.sink, ?row, "dry run");
        self.stats.written += 1;
        Ok(Vec::new())
    }

    fn stats(&self) -> SinkStats {
        self.stats.clone()
    }
}

struct SinkSlot {
    name: String,
    sink: Box<dyn Sink>,
    failure: Option<String>,
}

impl SinkSlot {
    fn fail(&mut self, err: PipelineError) {
        error!(sink = %self.name, error = %err, "sink failed, detached for the rest of the run");
        self.failure = Some(err.to_string());
    }

    fn report(&self, rejected: Vec<Rejected>, errors: &ErrorChannel) {
        for rejection in rejected {
            errors.report(SoftError {
                stage: self.name.clone(),
                kind: SoftErrorKind::Sink,
                message: rejection.reason,
                identity: Some(rejection.identity),
            });
        }
    }
}

/// Fans rows out to independent sinks. A failing sink is detached; the
/// others keep receiving rows.
#[derive(Default)]
pub struct SinkSet {
    slots: Vec<SinkSlot>,
}

impl SinkSet {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        let mut set = Self::default();
        for sink in sinks {
            set.push(sink);
        }
        set
    }

    pub fn push(&mut self, sink: Box<dyn Sink>) {
        self.slots.push(SinkSlot {
            name: sink.name(),
            sink,
            failure: None,
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.failure.is_none()).count()
    }

    pub async fn deliver(&mut self, row: &Row, errors: &ErrorChannel) {
        for slot in &mut self.slots {
            if slot.failure.is_some() {
                continue;
            }
            match slot.sink.write(row).await {
                Ok(rejected) => slot.report(rejected, errors),
                Err(err) => slot.fail(err),
            }
        }
    }

    /// Flushes and closes every live sink and returns the stats of all.
    pub async fn close(self, errors: &ErrorChannel) -> Vec<SinkStats> {
        let mut all_stats = Vec::with_capacity(self.slots.len());
        for mut slot in self.slots {
            if slot.failure.is_none() {
                match slot.sink.flush().await {
                    Ok(rejected) => slot.report(rejected, errors),
                    Err(err) => slot.fail(err),
                }
            }
            if slot.failure.is_none() {
                if let Err(err) = slot.sink.close().await {
                    slot.fail(err);
                }
            }
            let mut stats = slot.sink.stats();
            if let Some(failure) = slot.failure {
                stats.failed = true;
                stats.error = Some(failure);
            }
            all_stats.push(stats);
        }
        all_stats
    }
}
