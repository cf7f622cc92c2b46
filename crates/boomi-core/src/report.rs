// crates/boomi-core/src/report.rs
use boomi_parser::Row;
use serde::Serialize;
use uuid::Uuid;

use crate::context::{JobContext, ReasonCount};
use crate::sink::SinkStats;

const TOP_REASONS: usize = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseReport {
    pub phase: String,
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub rows_emitted: usize,
    pub cache_entries: Option<usize>,
    pub sinks: Vec<SinkStats>,
}

impl PhaseReport {
    pub fn named(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SoftErrorSummary {
    pub total: usize,
    pub top_reasons: Vec<ReasonCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job: String,
    pub run_id: Uuid,
    pub dry_run: bool,
    pub phases: Vec<PhaseReport>,
    pub anomalies: Vec<Row>,
    pub soft_errors: SoftErrorSummary,
}

impl RunReport {
    pub fn new(job: &str, ctx: &JobContext) -> Self {
        Self {
            job: job.to_string(),
            run_id: ctx.run_id,
            dry_run: ctx.options.dry_run,
            phases: Vec::new(),
            anomalies: Vec::new(),
            soft_errors: SoftErrorSummary {
                total: 0,
                top_reasons: Vec::new(),
            },
        }
    }

    pub fn push(&mut self, phase: PhaseReport) {
        self.phases.push(phase);
    }

    pub fn extend(&mut self, phases: impl IntoIterator<Item = PhaseReport>) {
        self.phases.extend(phases);
    }

    /// Snapshots the soft-error channel into the report.
    pub fn finish(mut self, ctx: &JobContext) -> Self {
        self.soft_errors = SoftErrorSummary {
            total: ctx.errors.len(),
            top_reasons: ctx.errors.top_reasons(TOP_REASONS),
        };
        self
    }

    pub fn sinks(&self) -> impl Iterator<Item = &SinkStats> {
        self.phases.iter().flat_map(|phase| phase.sinks.iter())
    }

    pub fn failed_sinks(&self) -> Vec<&SinkStats> {
        self.sinks().filter(|stats| stats.failed).collect()
    }

    /// True when no sink failed. Dropped and rejected rows do not count.
    pub fn succeeded(&self) -> bool {
        self.sinks().all(|stats| !stats.failed)
    }

    pub fn rows_read(&self) -> usize {
        self.phases.iter().map(|phase| phase.rows_read).sum()
    }

    pub fn rows_dropped(&self) -> usize {
        self.phases.iter().map(|phase| phase.rows_dropped).sum()
    }

    pub fn rows_emitted(&self) -> usize {
        self.phases.iter().map(|phase| phase.rows_emitted).sum()
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|phase| phase.phase == name)
    }
}
