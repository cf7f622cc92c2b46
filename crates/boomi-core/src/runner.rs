// crates/boomi-core/src/runner.rs
use std::collections::BTreeMap;

use boomi_parser::{ParserError, Row};
use tracing::{info, info_span, Instrument};

use crate::cache::{BuiltCache, CacheBuilder, CacheSet, CollisionPolicy};
use crate::context::{ErrorChannel, JobContext, SoftError, SoftErrorKind};
use crate::error::Result;
use crate::filters::ValidityFilter;
use crate::report::{PhaseReport, RunReport};
use crate::sink::{Sink, SinkSet};
use crate::source::{open_checked, Source};
use crate::transform::{Step, StepScope, TransformChain};

fn filter_rejection(phase: &str, message: String, identity: Option<String>) -> SoftError {
    SoftError {
        stage: format!("{phase}:filter"),
        kind: SoftErrorKind::Validation,
        message,
        identity,
    }
}

/// A record the reader could not turn into a row. Only that record is lost.
fn unreadable(phase: &str, source: &str, err: ParserError) -> SoftError {
    SoftError {
        stage: format!("{phase}:read"),
        kind: SoftErrorKind::Validation,
        message: format!("{source}: {err}"),
        identity: None,
    }
}

/// A secondary route fed with every row the main pipeline emits.
pub struct Branch {
    name: String,
    chain: TransformChain,
    filter: ValidityFilter,
    sinks: SinkSet,
    collect: bool,
    collected: Vec<Row>,
    report: PhaseReport,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            report: PhaseReport::named(name.clone()),
            name,
            chain: TransformChain::new(),
            filter: ValidityFilter::new(),
            sinks: SinkSet::default(),
            collect: false,
            collected: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.chain = self.chain.step(step);
        self
    }

    pub fn filter(mut self, filter: ValidityFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Keep the branch output in memory for the caller.
    pub fn collecting(mut self) -> Self {
        self.collect = true;
        self
    }

    async fn accept(&mut self, row: &Row, scope: &StepScope<'_>) {
        self.report.rows_read += 1;
        let outputs = self.chain.run(row.clone(), scope);
        if outputs.is_empty() {
            self.report.rows_dropped += 1;
            return;
        }
        for output in outputs {
            if let Err(rejection) = self.filter.check(&output) {
                self.report.rows_dropped += 1;
                scope.errors.report(filter_rejection(
                    &self.name,
                    rejection.to_string(),
                    scope.identity(&output),
                ));
                continue;
            }
            self.report.rows_emitted += 1;
            self.sinks.deliver(&output, scope.errors).await;
            if self.collect {
                self.collected.push(output);
            }
        }
    }

    async fn finish(self, errors: &ErrorChannel) -> (String, PhaseReport, Option<Vec<Row>>) {
        let mut report = self.report;
        report.sinks = self.sinks.close(errors).await;
        let collected = self.collect.then_some(self.collected);
        (self.name, report, collected)
    }
}

#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub phases: Vec<PhaseReport>,
    pub collected: BTreeMap<String, Vec<Row>>,
}

impl PipelineOutcome {
    /// Rows collected by the named branch.
    pub fn take(&mut self, branch: &str) -> Vec<Row> {
        self.collected.remove(branch).unwrap_or_default()
    }
}

/// Source, transform chain, validity filter and sinks run row by row.
pub struct Pipeline {
    name: String,
    source: Box<dyn Source>,
    chain: TransformChain,
    filter: ValidityFilter,
    sinks: SinkSet,
    branches: Vec<Branch>,
    identity: Vec<String>,
    limit: Option<usize>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, source: Box<dyn Source>) -> Self {
        Self {
            name: name.into(),
            source,
            chain: TransformChain::new(),
            filter: ValidityFilter::new(),
            sinks: SinkSet::default(),
            branches: Vec::new(),
            identity: Vec::new(),
            limit: None,
        }
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.chain = self.chain.step(step);
        self
    }

    pub fn chain(mut self, chain: TransformChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn filter(mut self, filter: ValidityFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sinks(mut self, sinks: Vec<Box<dyn Sink>>) -> Self {
        for sink in sinks {
            self.sinks.push(sink);
        }
        self
    }

    pub fn branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    /// Fields used to name a row in soft errors.
    pub fn identity(mut self, fields: &[&str]) -> Self {
        self.identity = fields.iter().map(|field| field.to_string()).collect();
        self
    }

    /// Stop after reading `limit` source rows.
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub async fn run(self, ctx: &JobContext, caches: &CacheSet) -> Result<PipelineOutcome> {
        let span = info_span!("phase", phase = %self.name);
        self.run_inner(ctx, caches).instrument(span).await
    }

    async fn run_inner(self, ctx: &JobContext, caches: &CacheSet) -> Result<PipelineOutcome> {
        let Pipeline {
            name,
            mut source,
            mut chain,
            filter,
            mut sinks,
            mut branches,
            identity,
            limit,
        } = self;

        let scope = StepScope {
            caches,
            errors: &ctx.errors,
            options: &ctx.options,
            identity_fields: &identity,
        };
        let source_name = source.name();
        let mut report = PhaseReport::named(name.clone());
        let mut rows = open_checked(source.as_mut(), ctx).await?;
        info!(source = %source_name, sinks = sinks.len(), "phase started");

        while let Some(item) = rows.next() {
            if limit.is_some_and(|limit| report.rows_read >= limit) {
                info!(limit = ?limit, "row limit reached");
                break;
            }
            report.rows_read += 1;
            let row = match item {
                Ok(row) => row,
                Err(err) => {
                    report.rows_dropped += 1;
                    ctx.errors.report(unreadable(&name, &source_name, err));
                    continue;
                }
            };

            let outputs = chain.run(row, &scope);
            if outputs.is_empty() {
                report.rows_dropped += 1;
                continue;
            }
            for output in outputs {
                if let Err(rejection) = filter.check(&output) {
                    report.rows_dropped += 1;
                    ctx.errors.report(filter_rejection(
                        &name,
                        rejection.to_string(),
                        scope.identity(&output),
                    ));
                    continue;
                }
                report.rows_emitted += 1;
                sinks.deliver(&output, &ctx.errors).await;
                for branch in &mut branches {
                    branch.accept(&output, &scope).await;
                }
            }
        }

        report.sinks = sinks.close(&ctx.errors).await;
        info!(
            rows_read = report.rows_read,
            rows_dropped = report.rows_dropped,
            rows_emitted = report.rows_emitted,
            "phase finished"
        );

        let mut outcome = PipelineOutcome {
            phases: vec![report],
            collected: BTreeMap::new(),
        };
        for branch in branches {
            let (branch_name, branch_report, collected) = branch.finish(&ctx.errors).await;
            outcome.phases.push(branch_report);
            if let Some(rows) = collected {
                outcome.collected.insert(branch_name, rows);
            }
        }
        Ok(outcome)
    }
}

type KeyFn = dyn Fn(&Row) -> Option<String> + Send;

/// Reads a source into a [`LookupCache`](crate::cache::LookupCache).
pub struct CachePhase {
    name: String,
    source: Box<dyn Source>,
    chain: TransformChain,
    policy: CollisionPolicy,
    key: Box<KeyFn>,
}

impl CachePhase {
    /// Rows for which `key` returns `None` are skipped.
    pub fn new<F>(
        name: impl Into<String>,
        source: Box<dyn Source>,
        policy: CollisionPolicy,
        key: F,
    ) -> Self
    where
        F: Fn(&Row) -> Option<String> + Send + 'static,
    {
        Self {
            name: name.into(),
            source,
            chain: TransformChain::new(),
            policy,
            key: Box::new(key),
        }
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.chain = self.chain.step(step);
        self
    }

    pub async fn build(
        self,
        ctx: &JobContext,
        earlier: &CacheSet,
    ) -> Result<(BuiltCache, PhaseReport)> {
        let span = info_span!("cache", cache = %self.name);
        self.build_inner(ctx, earlier).instrument(span).await
    }

    async fn build_inner(
        self,
        ctx: &JobContext,
        earlier: &CacheSet,
    ) -> Result<(BuiltCache, PhaseReport)> {
        let CachePhase {
            name,
            mut source,
            mut chain,
            policy,
            key,
        } = self;
        let scope = StepScope {
            caches: earlier,
            errors: &ctx.errors,
            options: &ctx.options,
            identity_fields: &[],
        };
        let source_name = source.name();
        let mut builder = CacheBuilder::new(name.clone(), policy);
        let mut report = PhaseReport::named(format!("cache:{name}"));

        let rows = open_checked(source.as_mut(), ctx).await?;
        for item in rows {
            report.rows_read += 1;
            let row = match item {
                Ok(row) => row,
                Err(err) => {
                    report.rows_dropped += 1;
                    ctx.errors.report(unreadable(&report.phase, &source_name, err));
                    continue;
                }
            };
            let outputs = chain.run(row, &scope);
            if outputs.is_empty() {
                report.rows_dropped += 1;
                continue;
            }
            for output in outputs {
                match key(&output) {
                    Some(cache_key) => {
                        report.rows_emitted += 1;
                        builder.insert(cache_key, output);
                    }
                    None => report.rows_dropped += 1,
                }
            }
        }

        let built = builder.finish();
        report.cache_entries = Some(built.cache.len());
        info!(
            entries = built.cache.len(),
            anomalies = built.anomalies.len(),
            "cache built"
        );
        Ok((built, report))
    }
}

#[derive(Debug, Default)]
pub struct BuiltCaches {
    pub caches: CacheSet,
    pub phases: Vec<PhaseReport>,
    pub anomalies: Vec<Row>,
}

/// Runs every cache phase to completion, in order. Later phases may read
/// the caches built before them.
pub async fn build_caches(ctx: &JobContext, phases: Vec<CachePhase>) -> Result<BuiltCaches> {
    let mut built = BuiltCaches::default();
    for phase in phases {
        let (cache, report) = phase.build(ctx, &built.caches).await?;
        built.caches.insert(cache.cache);
        built.anomalies.extend(cache.anomalies);
        built.phases.push(report);
    }
    Ok(built)
}

/// Builds every cache, then runs the main pipeline against the finished set.
pub async fn two_phase(
    ctx: &JobContext,
    job: &str,
    cache_phases: Vec<CachePhase>,
    main: Pipeline,
) -> Result<RunReport> {
    let built = build_caches(ctx, cache_phases).await?;
    let outcome = main.run(ctx, &built.caches).await?;

    let mut report = RunReport::new(job, ctx);
    report.extend(built.phases);
    report.extend(outcome.phases);
    report.anomalies = built.anomalies;
    Ok(report.finish(ctx))
}

/// Runs a pipeline that needs no caches.
pub async fn run_single(ctx: &JobContext, job: &str, pipeline: Pipeline) -> Result<RunReport> {
    let outcome = pipeline.run(ctx, &CacheSet::default()).await?;
    let mut report = RunReport::new(job, ctx);
    report.extend(outcome.phases);
    Ok(report.finish(ctx))
}
