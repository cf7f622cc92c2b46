// crates/boomi-core/src/context.rs
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::db::{Engine, EngineRegistry};
use crate::error::Result;
use crate::files::FileStore;
use crate::http::HttpClient;
use crate::options::JobOptions;
use crate::sink::{DryRunSink, FileSink, Sink, SqlSink, TicketSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftErrorKind {
    Validation,
    Lookup,
    Sink,
}

impl fmt::Display for SoftErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SoftErrorKind::Validation => "validation",
            SoftErrorKind::Lookup => "lookup",
            SoftErrorKind::Sink => "sink",
        };
        f.write_str(label)
    }
}

/// A row-level failure: the row is dropped, the run continues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftError {
    pub stage: String,
    pub kind: SoftErrorKind,
    pub message: String,
    pub identity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasonCount {
    pub stage: String,
    pub kind: SoftErrorKind,
    pub count: usize,
}

#[derive(Debug, Default)]
pub struct ErrorChannel {
    errors: Mutex<Vec<SoftError>>,
}

impl ErrorChannel {
    pub fn report(&self, error: SoftError) {
        warn!(
            stage = %error.stage,
            kind = %error.kind,
            identity = error.identity.as_deref().unwrap_or(""),
            "{}",
            error.message
        );
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    pub fn len(&self) -> usize {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<SoftError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most frequent `(stage, kind)` pairs, largest first.
    pub fn top_reasons(&self, limit: usize) -> Vec<ReasonCount> {
        let errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts: HashMap<(&str, SoftErrorKind), usize> = HashMap::new();
        for error in errors.iter() {
            *counts.entry((error.stage.as_str(), error.kind)).or_default() += 1;
        }
        let mut reasons: Vec<ReasonCount> = counts
            .into_iter()
            .map(|((stage, kind), count)| ReasonCount {
                stage: stage.to_string(),
                kind,
                count,
            })
            .collect();
        reasons.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.stage.cmp(&b.stage)));
        reasons.truncate(limit);
        reasons
    }
}

/// Everything a job needs at run time: options, clients, stores and engines.
#[derive(Debug)]
pub struct JobContext {
    pub run_id: Uuid,
    pub options: Arc<JobOptions>,
    pub errors: ErrorChannel,
    engines: EngineRegistry,
    workday: HttpClient,
    servicenow: HttpClient,
    sftp: FileStore,
    centerstone: FileStore,
    billing: FileStore,
}

impl JobContext {
    pub fn new(options: JobOptions) -> Result<Self> {
        let cache_dir = options.use_cache.then(|| options.cache_dir.clone());
        let workday =
            HttpClient::new(Some(options.workday.credentials.clone()), cache_dir.clone())?;
        let servicenow = HttpClient::new(Some(options.servicenow.credentials.clone()), cache_dir)?;
        let sftp = FileStore::new("sftp", &options.sftp_root);
        let centerstone = FileStore::new("centerstone", &options.centerstone_root);
        let billing = FileStore::new("billing", &options.billing_root);
        let engines = EngineRegistry::new(options.engine_urls.clone());

        Ok(Self {
            run_id: Uuid::new_v4(),
            options: Arc::new(options),
            errors: ErrorChannel::default(),
            engines,
            workday,
            servicenow,
            sftp,
            centerstone,
            billing,
        })
    }

    pub fn workday(&self) -> &HttpClient {
        &self.workday
    }

    pub fn servicenow(&self) -> &HttpClient {
        &self.servicenow
    }

    pub fn sftp(&self) -> &FileStore {
        &self.sftp
    }

    pub fn centerstone(&self) -> &FileStore {
        &self.centerstone
    }

    pub fn billing(&self) -> &FileStore {
        &self.billing
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub async fn engine(&self, name: &str) -> Result<Engine> {
        self.engines.engine(name).await
    }

    /// One upsert sink per selected engine, or dry-run stand-ins.
    pub async fn sql_sinks(
        &self,
        table: &str,
        discriminant: &[&str],
        buffer_size: usize,
    ) -> Result<Vec<Box<dyn Sink>>> {
        let mut sinks: Vec<Box<dyn Sink>> = Vec::with_capacity(self.options.engines.len());
        for name in &self.options.engines {
            if self.options.dry_run {
                sinks.push(Box::new(DryRunSink::keyed(
                    format!("{name}:{table}"),
                    discriminant,
                )));
            } else {
                let engine = self.engine(name).await?;
                sinks.push(Box::new(SqlSink::new(engine, table, discriminant, buffer_size)));
            }
        }
        Ok(sinks)
    }

    pub fn file_sink(&self, sink: FileSink) -> Box<dyn Sink> {
        if self.options.dry_run {
            Box::new(DryRunSink::new(sink.name(), sink.discriminant().to_vec()))
        } else {
            Box::new(sink)
        }
    }

    pub fn ticket_sink(&self, url: String) -> Box<dyn Sink> {
        if self.options.dry_run {
            Box::new(DryRunSink::new(format!("tickets:{url}"), Vec::new()))
        } else {
            Box::new(TicketSink::new(self.servicenow.clone(), url))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soft(stage: &str, kind: SoftErrorKind) -> SoftError {
        SoftError {
            stage: stage.to_string(),
            kind,
            message: "nope".to_string(),
            identity: None,
        }
    }

    #[test]
    fn top_reasons_orders_by_frequency() {
        let channel = ErrorChannel::default();
        channel.report(soft("find_badge_ids", SoftErrorKind::Lookup));
        channel.report(soft("parse_dates", SoftErrorKind::Validation));
        channel.report(soft("find_badge_ids", SoftErrorKind::Lookup));

        let reasons = channel.top_reasons(5);
        assert_eq!(reasons.len(), 2);
        assert_eq!(reasons[0].stage, "find_badge_ids");
        assert_eq!(reasons[0].count, 2);
        assert_eq!(channel.len(), 3);
        assert_eq!(channel.top_reasons(1).len(), 1);
    }
}
