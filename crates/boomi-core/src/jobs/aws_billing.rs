// crates/boomi-core/src/jobs/aws_billing.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use boomi_parser::{DelimitedFormat, Row, Value};
use chrono::NaiveDate;
use polars::prelude::{
    col, DataFrame, IntoLazy, NamedFrom, PolarsResult, Series, SortMultipleOptions,
};
use serde::Serialize;
use sqlx::Row as _;
use tracing::{info, warn};

use super::Job;
use crate::cache::CollisionPolicy;
use crate::context::{JobContext, SoftErrorKind};
use crate::db::Dialect;
use crate::error::PipelineError;
use crate::files::FileStore;
use crate::filters::{ValidityFilter, ValidityStep};
use crate::report::RunReport;
use crate::runner::{build_caches, Branch, CachePhase, Pipeline};
use crate::sink::{Sink, DEFAULT_BUFFER_SIZE};
use crate::source::{ConcatSource, FileSource, MemorySource, Source, SqlSource};
use crate::transform::{FnStep, ParseDates, StepOutcome, StepScope, TransformChain};
use crate::upsert;

pub const DEFAULT_TABLE: &str = "ods_itsm_aws_monthly_cost";
pub const SUMMARY_TABLE: &str = "fact_itsm_aws_historical_cost";
pub const ACCOUNTS_CACHE: &str = "dim_aws_accounts";
pub const DATES_CACHE: &str = "dim_date";
pub const DISCRIMINANT: [&str; 4] = ["invoiceid", "linkedaccountid", "payeraccountid", "recordid"];
pub const SUMMARY_DISCRIMINANT: [&str; 3] = ["productname", "date_sk", "account_name_sk"];
/// Columns a monthly report must carry, after header normalization.
pub const REPORT_FIELDS: [&str; 9] = [
    "invoiceid",
    "payeraccountid",
    "linkedaccountid",
    "recordtype",
    "recordid",
    "billingperiodenddate",
    "invoicedate",
    "productname",
    "totalcost",
];
const SUMMARY_BRANCH: &str = "summary";
const RETENTION_COLUMN: &str = "invoicedate";

/// Monthly cost allocation report name for `account` and `month`.
pub fn report_file(account: &str, month: NaiveDate) -> String {
    format!("{account}-aws-cost-allocation-{}.csv", month.format("%Y-%m"))
}

/// The first line of a report is a notice about tags, not the header.
pub fn report_format() -> DelimitedFormat {
    DelimitedFormat::csv()
        .with_skip_rows(1)
        .with_normalized_headers()
        .strict()
}

pub fn report_source(store: FileStore, account: &str, month: NaiveDate) -> FileSource {
    FileSource::delimited(store, report_file(account, month), report_format())
        .requiring(&REPORT_FIELDS)
}

/// Accounts with a report for `month` in `store`.
pub fn discover_accounts(store: &FileStore, month: NaiveDate) -> Result<Vec<String>> {
    let suffix = report_file("", month);
    let mut accounts: Vec<String> = store
        .list(&format!("*{suffix}"))?
        .into_iter()
        .filter_map(|name| name.strip_suffix(&suffix).map(str::to_string))
        .filter(|account| !account.is_empty())
        .collect();
    accounts.dedup();
    Ok(accounts)
}

fn fix_numbers(row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
    let blank = |field: &str| row.get(field).is_some_and(Value::is_blank);
    if !blank("blendedrate") && !blank("rateid") {
        return StepOutcome::Keep;
    }
    let mut fixed = row.clone();
    for field in ["blendedrate", "rateid"] {
        if blank(field) {
            fixed.set(field, 0_i64);
        }
    }
    StepOutcome::Replace(fixed)
}

pub fn chain() -> TransformChain {
    TransformChain::new()
        .step(ValidityStep::new(
            "invalid_entries",
            ValidityFilter::new()
                .require("linkedaccountid")
                .date("invoicedate"),
        ))
        .step(FnStep::new("fix_numbers", fix_numbers))
        .step(ParseDates::matching("date").as_date())
}

fn filter_summary(row: &Row, scope: &StepScope<'_>) -> StepOutcome {
    if row.text("recordtype") != "LinkedLineItem" {
        return StepOutcome::Drop;
    }
    let Some(total) = row.get("totalcost").and_then(Value::as_f64) else {
        return scope.reject(
            "filter_summary",
            SoftErrorKind::Validation,
            format!("unparsable total cost '{}'", row.text("totalcost")),
            row,
        );
    };
    StepOutcome::Replace(
        Row::new()
            .with("total_cost", total)
            .with("productname", row.get("productname").cloned().unwrap_or_default())
            .with("date", row.get("billingperiodenddate").cloned().unwrap_or_default())
            .with("linkedaccountid", row.get("linkedaccountid").cloned().unwrap_or_default()),
    )
}

fn lookup_account_sk(row: &Row, scope: &StepScope<'_>) -> StepOutcome {
    let account = row.text("linkedaccountid");
    let found = scope
        .caches
        .lookup(ACCOUNTS_CACHE, account.trim())
        .first()
        .filter(|dim| dim.get("account_name_key").is_some_and(|key| !key.is_blank()));
    match found {
        Some(dim) => StepOutcome::Replace(
            row.clone()
                .with("account_name_sk", dim.get("account_name_key").cloned().unwrap_or_default())
                .with("account_name", dim.get("account_name").cloned().unwrap_or_default()),
        ),
        None => scope.reject(
            "lookup_account_sk",
            SoftErrorKind::Lookup,
            format!("no account key for linked account {account}"),
            row,
        ),
    }
}

fn lookup_date_sk(row: &Row, scope: &StepScope<'_>) -> StepOutcome {
    let date = row.text("date");
    let found = scope
        .caches
        .lookup(DATES_CACHE, &date)
        .first()
        .and_then(|dim| dim.get("date_key"))
        .filter(|key| !key.is_blank());
    match found {
        Some(key) => StepOutcome::Replace(row.clone().with("date_sk", key.clone())),
        None => scope.reject(
            "lookup_date_sk",
            SoftErrorKind::Lookup,
            format!("no date key for {date}"),
            row,
        ),
    }
}

/// Line items reduced to cost per product, account and billing period end.
pub fn summary_branch() -> Branch {
    Branch::new(SUMMARY_BRANCH)
        .step(FnStep::new("filter_summary", filter_summary))
        .step(FnStep::new("lookup_account_sk", lookup_account_sk))
        .step(FnStep::new("lookup_date_sk", lookup_date_sk))
        .collecting()
}

fn key_value(text: Option<&str>) -> Value {
    match text {
        None => Value::Null,
        Some(text) => text
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(text.to_string())),
    }
}

/// Sums `total_cost` per `(account_name_sk, date_sk, productname)`.
pub fn summarize_costs(rows: &[Row]) -> PolarsResult<Vec<Row>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let accounts: Vec<String> = rows.iter().map(|row| row.text("account_name_sk")).collect();
    let dates: Vec<String> = rows.iter().map(|row| row.text("date_sk")).collect();
    let products: Vec<String> = rows.iter().map(|row| row.text("productname")).collect();
    let costs: Vec<f64> = rows
        .iter()
        .map(|row| row.get("total_cost").and_then(Value::as_f64).unwrap_or(0.0))
        .collect();

    let df = DataFrame::new(vec![
        Series::new("account_name_sk".into(), accounts).into(),
        Series::new("date_sk".into(), dates).into(),
        Series::new("productname".into(), products).into(),
        Series::new("total_cost".into(), costs).into(),
    ])?;
    let summary = df
        .lazy()
        .group_by([col("account_name_sk"), col("date_sk"), col("productname")])
        .agg([col("total_cost").sum()])
        .sort(
            ["account_name_sk", "date_sk", "productname"],
            SortMultipleOptions::default(),
        )
        .collect()?;

    let accounts = summary.column("account_name_sk")?.str()?;
    let dates = summary.column("date_sk")?.str()?;
    let products = summary.column("productname")?.str()?;
    let totals = summary.column("total_cost")?.f64()?;
    Ok((0..summary.height())
        .map(|idx| {
            Row::new()
                .with("date_sk", key_value(dates.get(idx)))
                .with("productname", products.get(idx).map(str::to_string))
                .with("account_name_sk", key_value(accounts.get(idx)))
                .with("total_cost", totals.get(idx))
        })
        .collect())
}

/// Account dimension keyed by linked account number. A number listed twice
/// is surfaced as an anomaly.
pub fn accounts_cache(source: Box<dyn Source>) -> CachePhase {
    CachePhase::new(ACCOUNTS_CACHE, source, CollisionPolicy::FlagAnomaly, |row| {
        let key = row.text("linked_account_number");
        let key = key.trim();
        (!key.is_empty()).then(|| key.to_string())
    })
}

pub fn dates_cache(source: Box<dyn Source>) -> CachePhase {
    CachePhase::new(DATES_CACHE, source, CollisionPolicy::Overwrite, |row| {
        let key = row.text("date");
        let key = key.get(..10).unwrap_or(&key);
        (!key.is_empty()).then(|| key.to_string())
    })
}

pub fn accounts_query(engine: &str) -> SqlSource {
    SqlSource::new(engine, |dialect: Dialect| {
        format!(
            "SELECT {} AS linked_account_number, account_name_key, account_name FROM dim_aws_accounts",
            dialect.cast_text("linked_account_number")
        )
    })
}

pub fn dates_query(engine: &str) -> SqlSource {
    SqlSource::new(engine, |dialect: Dialect| {
        format!(
            "SELECT {} AS date, date_key FROM dim_date",
            dialect.cast_text("date")
        )
    })
}

pub struct BillingInputs {
    pub reports: Box<dyn Source>,
    pub accounts: Box<dyn Source>,
    pub dates: Box<dyn Source>,
}

pub async fn run_with(
    ctx: &JobContext,
    inputs: BillingInputs,
    detail_sinks: Vec<Box<dyn Sink>>,
    summary_sinks: Vec<Box<dyn Sink>>,
) -> Result<RunReport> {
    let built = build_caches(
        ctx,
        vec![accounts_cache(inputs.accounts), dates_cache(inputs.dates)],
    )
    .await?;

    let detail = Pipeline::new("aws_billing", inputs.reports)
        .chain(chain())
        .filter(ValidityFilter::discriminant(&DISCRIMINANT))
        .identity(&["linkedaccountid", "invoiceid", "recordid"])
        .sinks(detail_sinks)
        .branch(summary_branch());
    let mut outcome = detail.run(ctx, &built.caches).await?;

    let line_items = outcome.take(SUMMARY_BRANCH);
    let sums = summarize_costs(&line_items).context("summarizing costs")?;
    info!(line_items = line_items.len(), groups = sums.len(), "costs summarized");

    let summary = Pipeline::new(
        "historical_cost",
        Box::new(MemorySource::new("cost_summary", sums)),
    )
    .filter(ValidityFilter::discriminant(&SUMMARY_DISCRIMINANT))
    .identity(&SUMMARY_DISCRIMINANT)
    .sinks(summary_sinks)
    .run(ctx, &built.caches)
    .await?;

    let mut report = RunReport::new("aws_billing", ctx);
    report.extend(built.phases);
    report.extend(outcome.phases);
    report.extend(summary.phases);
    report.anomalies = built.anomalies;
    Ok(report.finish(ctx))
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub engine: String,
    pub table: String,
    pub cutoff: NaiveDate,
    pub matched: i64,
    pub deleted: u64,
}

/// Deletes detail rows invoiced before the lookback window, on every engine.
pub async fn cleanup(ctx: &JobContext, table: &str) -> Result<Vec<CleanupReport>> {
    let cutoff = ctx.options.cutoff_months(ctx.options.months);
    let mut reports = Vec::with_capacity(ctx.options.engines.len());
    for name in &ctx.options.engines {
        let engine = ctx.engine(name).await?;
        let count = upsert::count_before(engine.dialect, table, RETENTION_COLUMN, cutoff);
        let matched: i64 = count
            .query()
            .fetch_one(&engine.pool)
            .await
            .and_then(|row| row.try_get(0))
            .with_context(|| format!("counting expired rows in {table} on {name}"))?;
        let delete = upsert::delete_before(engine.dialect, table, RETENTION_COLUMN, cutoff);
        let deleted = delete
            .query()
            .execute(&engine.pool)
            .await
            .with_context(|| format!("deleting expired rows in {table} on {name}"))?
            .rows_affected();
        info!(engine = %name, table, %cutoff, matched, deleted, "cleanup finished");
        reports.push(CleanupReport {
            engine: name.clone(),
            table: table.to_string(),
            cutoff,
            matched,
            deleted,
        });
    }
    Ok(reports)
}

/// Monthly AWS cost allocation reports, detailed and summarised.
pub struct AwsBilling;

impl AwsBilling {
    /// The configured account, or the only account with a report for the
    /// newest month in the window.
    fn account_id(ctx: &JobContext, newest: NaiveDate) -> Result<String> {
        if let Some(account) = &ctx.options.aws_account_id {
            return Ok(account.clone());
        }
        let found = discover_accounts(ctx.billing(), newest)?;
        match found.as_slice() {
            [account] => {
                info!(account = %account, "using the account found in the billing store");
                Ok(account.clone())
            }
            [] => Err(PipelineError::Config(format!(
                "no {} report found, pass --aws-account-id",
                newest.format("%Y-%m")
            ))
            .into()),
            many => Err(PipelineError::Config(format!(
                "reports for several accounts ({}), pass --aws-account-id",
                many.join(", ")
            ))
            .into()),
        }
    }
}

#[async_trait]
impl Job for AwsBilling {
    fn code_identifier(&self) -> &'static str {
        "aws_billing"
    }

    fn description(&self) -> &'static str {
        "AWS cost allocation reports into monthly detail and historical cost facts"
    }

    fn default_table(&self) -> Option<&'static str> {
        Some(DEFAULT_TABLE)
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunReport> {
        let months = ctx.options.lookback_months(ctx.options.months);
        let newest = months
            .iter()
            .max()
            .copied()
            .ok_or_else(|| PipelineError::Config("empty billing window".into()))?;
        let account = Self::account_id(ctx, newest)?;
        let reports: Vec<Box<dyn Source>> = months
            .iter()
            .map(|month| {
                info!(month = %month.format("%Y-%m"), "queueing billing report");
                Box::new(report_source(ctx.billing().clone(), &account, *month)) as Box<dyn Source>
            })
            .collect();
        let lookup_engine = ctx
            .options
            .engines
            .first()
            .cloned()
            .ok_or_else(|| PipelineError::Config("no engine selected".into()))?;
        let inputs = BillingInputs {
            reports: Box::new(
                ConcatSource::new("billing_reports", reports).limit_each(ctx.options.limit),
            ),
            accounts: Box::new(accounts_query(&lookup_engine)),
            dates: Box::new(dates_query(&lookup_engine)),
        };

        let table = ctx.options.table(DEFAULT_TABLE);
        let summary_table = ctx.options.fixed_table(SUMMARY_TABLE);
        let detail_sinks = ctx
            .sql_sinks(&table, &DISCRIMINANT, DEFAULT_BUFFER_SIZE)
            .await
            .with_context(|| format!("opening sinks for {table}"))?;
        let summary_sinks = ctx
            .sql_sinks(&summary_table, &SUMMARY_DISCRIMINANT, DEFAULT_BUFFER_SIZE)
            .await
            .with_context(|| format!("opening sinks for {summary_table}"))?;

        let report = run_with(ctx, inputs, detail_sinks, summary_sinks).await?;

        if !ctx.options.cleanup {
            info!("cleanup disabled");
        } else if ctx.options.dry_run {
            warn!(table = %table, "dry run, cleanup skipped");
        } else if report.succeeded() {
            cleanup(ctx, &table).await?;
        } else {
            warn!(table = %table, "sink failures, cleanup skipped");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::tests::Harness;

    fn line_item(account_sk: i64, product: &str, cost: f64) -> Row {
        Row::new()
            .with("total_cost", cost)
            .with("productname", product)
            .with("date_sk", 20180331_i64)
            .with("account_name_sk", account_sk)
    }

    #[test]
    fn report_names_follow_month() {
        let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            report_file("123456789012", month),
            "123456789012-aws-cost-allocation-2024-01.csv"
        );
    }

    #[test]
    fn blank_rates_become_zero_and_dates_parse() {
        let harness = Harness::new();
        let row = Row::new()
            .with("invoiceid", "INV1")
            .with("linkedaccountid", "222")
            .with("invoicedate", "2018/04/02 10:00:00")
            .with("blendedrate", "")
            .with("rateid", "7");
        let out = chain().run(row, &harness.scope());
        assert_eq!(out[0].get("blendedrate"), Some(&Value::Int(0)));
        assert_eq!(out[0].text("rateid"), "7");
        assert_eq!(
            out[0].get("invoicedate"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2018, 4, 2).unwrap()))
        );
    }

    #[test]
    fn rows_without_linked_account_are_soft_errors() {
        let harness = Harness::new();
        let row = Row::new()
            .with("linkedaccountid", "")
            .with("invoicedate", "2018/04/02 10:00:00");
        assert!(chain().run(row, &harness.scope()).is_empty());
        assert_eq!(harness.errors.snapshot()[0].stage, "invalid_entries");
    }

    #[test]
    fn unparsable_invoice_dates_are_soft_errors() {
        let harness = Harness::new();
        let row = Row::new()
            .with("linkedaccountid", "222")
            .with("invoicedate", "not a date");
        assert!(chain().run(row, &harness.scope()).is_empty());
        assert!(harness.errors.snapshot()[0].message.contains("invoicedate"));
    }

    #[test]
    fn accounts_are_discovered_from_report_names() {
        let dir = tempfile::tempdir().unwrap();
        let april = NaiveDate::from_ymd_opt(2018, 4, 1).unwrap();
        let march = NaiveDate::from_ymd_opt(2018, 3, 1).unwrap();
        for name in [
            report_file("123", april),
            report_file("456", april),
            report_file("789", march),
            "notes-2018-04.csv".to_string(),
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let store = FileStore::new("billing", dir.path());

        assert_eq!(discover_accounts(&store, april).unwrap(), vec!["123", "456"]);
        assert_eq!(discover_accounts(&store, march).unwrap(), vec!["789"]);
        let may = NaiveDate::from_ymd_opt(2018, 5, 1).unwrap();
        assert!(discover_accounts(&store, may).unwrap().is_empty());
    }

    #[test]
    fn costs_are_summed_per_group() {
        let rows = vec![
            line_item(1, "Amazon EC2", 12.5),
            line_item(2, "Amazon S3", 1.25),
            line_item(1, "Amazon EC2", 2.5),
        ];
        let sums = summarize_costs(&rows).unwrap();
        assert_eq!(sums.len(), 2);
        assert_eq!(sums[0].get("account_name_sk"), Some(&Value::Int(1)));
        assert_eq!(sums[0].get("date_sk"), Some(&Value::Int(20180331)));
        assert_eq!(sums[0].get("total_cost"), Some(&Value::Float(15.0)));
        assert_eq!(sums[1].text("productname"), "Amazon S3");
        assert!(summarize_costs(&[]).unwrap().is_empty());
    }
}
