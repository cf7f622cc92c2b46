// crates/boomi-core/src/jobs/desk_audit.rs
use anyhow::Result;
use async_trait::async_trait;
use boomi_parser::{Row, Value};

use super::{workday_report, Job};
use crate::cache::CollisionPolicy;
use crate::context::JobContext;
use crate::report::RunReport;
use crate::runner::{build_caches, Branch, CachePhase, Pipeline};
use crate::sink::{FileSink, Sink};
use crate::source::{FileFormat, FileSource, HttpReportSource, Source};
use crate::transform::{Filter, FnStep, StepOutcome, StepScope, TransformChain};

pub const DESK_REPORT: &str = "WPR_Worker_Space_Number?format=csv";
pub const HR_EXPORT: &str = "HrExport.txt";
pub const EMPLOYEE_MISMATCHES: &str = "desk-mismatch-employees.txt";
pub const CONTINGENT_MISMATCHES: &str = "desk-mismatch-contingent.txt";
pub const DESK_CACHE: &str = "desk_ids";

pub const EXPORT_FIELDS: [&str; 5] = [
    "EmployeeID",
    "OfficeLocation",
    "WorkLocation_CS",
    "WorkLocation_WD",
    "SeatID",
];

/// Seat id prefixes by office.
pub const OFFICE_IDS: [(&str, &str); 11] = [
    ("San Francisco", "SF"),
    ("Mountain View", "MV"),
    ("Portland", "PDX"),
    ("London", "LON"),
    ("Vancouver", "YVR"),
    ("Toronto", "TOR"),
    ("Paris", "PAR"),
    ("Berlin", "BER"),
    ("Auckland", "AKL"),
    ("Bejing", "BJ"),
    ("Taipei", "TPE"),
];

const EMPLOYEE: &str = "Employee";
const CONTINGENT: &str = "Contingent Worker";

pub fn office_prefix(location: &str) -> Option<&'static str> {
    OFFICE_IDS
        .iter()
        .find(|(office, _)| *office == location)
        .map(|(_, prefix)| *prefix)
}

/// Bare seat numbers get the office prefix Workday uses, e.g. `101` in
/// San Francisco becomes `SF101`.
fn prefix_desk_ids(row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
    let seat = row.text("SeatID");
    if !seat.starts_with(|ch: char| ch.is_ascii_digit()) {
        return StepOutcome::Keep;
    }
    match office_prefix(&row.text("WorkLocation_CS")) {
        Some(prefix) => StepOutcome::Replace(row.clone().with("SeatID", format!("{prefix}{seat}"))),
        None => StepOutcome::Keep,
    }
}

fn join_workday(row: &Row, scope: &StepScope<'_>) -> StepOutcome {
    let employee = row.text("EmployeeID");
    let found = scope.caches.lookup(DESK_CACHE, employee.trim()).first();
    let field = |name: &str| {
        found
            .and_then(|desk| desk.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    };
    StepOutcome::Replace(
        row.clone()
            .with("wd_desk_id", field("WPR_Desk_Number"))
            .with("wd_employee_type", field("Worker_Type")),
    )
}

pub fn chain() -> TransformChain {
    TransformChain::new()
        .step(FnStep::new("prefix_desk_ids", prefix_desk_ids))
        .step(FnStep::new("join_workday", join_workday))
        .step(Filter::new("mismatch", |row: &Row| {
            row.get("wd_desk_id") != row.get("SeatID")
        }))
}

/// Workday desk assignment and worker type per employee id.
pub fn desk_cache(source: Box<dyn Source>) -> CachePhase {
    CachePhase::new(DESK_CACHE, source, CollisionPolicy::Overwrite, |row| {
        let key = row.text("Employee_ID");
        let key = key.trim();
        (!key.is_empty()).then(|| key.to_string())
    })
}

fn worker_type_is(row: &Row, expected: &str) -> bool {
    row.get("wd_employee_type").and_then(Value::as_str) == Some(expected)
}

pub async fn run_with(
    ctx: &JobContext,
    desks: Box<dyn Source>,
    export: Box<dyn Source>,
    employees: Box<dyn Sink>,
    contingent: Box<dyn Sink>,
) -> Result<RunReport> {
    let built = build_caches(ctx, vec![desk_cache(desks)]).await?;

    let pipeline = Pipeline::new("desk_audit", export)
        .chain(chain())
        .identity(&["EmployeeID"])
        .limit(ctx.options.limit)
        .branch(
            Branch::new("employees")
                .step(Filter::new("regular_employee", |row: &Row| {
                    worker_type_is(row, EMPLOYEE)
                }))
                .sink(employees),
        )
        .branch(
            Branch::new("contingent")
                .step(Filter::new("temp_employee", |row: &Row| {
                    worker_type_is(row, CONTINGENT)
                }))
                .sink(contingent),
        )
        .branch(
            Branch::new("odd")
                .step(Filter::new("odd_employee", |row: &Row| {
                    !worker_type_is(row, EMPLOYEE) && !worker_type_is(row, CONTINGENT)
                }))
                .collecting(),
        );
    let mut outcome = pipeline.run(ctx, &built.caches).await?;

    let mut report = RunReport::new("desk_audit", ctx);
    report.extend(built.phases);
    report.anomalies = built.anomalies;
    report.anomalies.extend(outcome.take("odd"));
    report.extend(outcome.phases);
    Ok(report.finish(ctx))
}

/// Compares Centerstone seat assignments with Workday desk numbers.
pub struct DeskAudit;

#[async_trait]
impl Job for DeskAudit {
    fn code_identifier(&self) -> &'static str {
        "desk_audit"
    }

    fn description(&self) -> &'static str {
        "Centerstone seats that disagree with Workday desk numbers"
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunReport> {
        let desks = HttpReportSource::new(ctx.workday().clone(), workday_report(ctx, DESK_REPORT))
            .requiring(&["Employee_ID", "WPR_Desk_Number", "Worker_Type"]);
        let input = ctx.options.input_file.as_deref().unwrap_or(HR_EXPORT);
        let export = FileSource::new(
            ctx.centerstone().clone(),
            input,
            FileFormat::latin1_lines("\r\n", '\t', &EXPORT_FIELDS),
        );
        let employees = ctx.file_sink(
            FileSink::new(ctx.centerstone().clone(), ctx.options.file(EMPLOYEE_MISMATCHES))
                .with_header(),
        );
        let contingent = ctx.file_sink(
            FileSink::new(ctx.centerstone().clone(), ctx.options.file(CONTINGENT_MISMATCHES))
                .with_header(),
        );
        run_with(ctx, Box::new(desks), Box::new(export), employees, contingent).await
    }
}
