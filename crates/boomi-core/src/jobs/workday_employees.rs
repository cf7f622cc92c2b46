// crates/boomi-core/src/jobs/workday_employees.rs
use anyhow::Result;
use async_trait::async_trait;
use boomi_parser::Row;
use tracing::info;

use super::{workday_report, Job};
use crate::context::JobContext;
use crate::report::RunReport;
use crate::runner::{run_single, Branch, Pipeline};
use crate::sink::{FileSink, Sink};
use crate::source::{HttpReportSource, Source};
use crate::transform::{Filter, FnStep, Limit, Remap, StepOutcome, StepScope};

pub const USERS_REPORT: &str = "intg__Service_Bus?format=csv&bom=true";
pub const USERS_FILE: &str = "workday-users.csv";
const SAMPLE_SIZE: usize = 3;

const REPORT_FIELDS: [&str; 12] = [
    "Employee_ID",
    "Preffered_Last_Name",
    "Preferred_First_Name",
    "Hire_Date",
    "Email",
    "Employee_Type",
    "Employee_Status",
    "Business_Title",
    "Work_Location",
    "Manager",
    "Supervisory_Organization",
    "termination_date",
];

/// Workday report columns renamed to the layout the badge join reads.
pub fn remap() -> Remap {
    Remap::new("employee_remap")
        .field("EmployeeNo", "Employee_ID")
        .field("Last_Name", "Preffered_Last_Name")
        .field("First_Name", "Preferred_First_Name")
        .fields(&["Hire_Date", "Email", "Employee_Type", "Employee_Status"])
        .field("Long_Title", "Business_Title")
        .fields(&["Work_Location", "Manager"])
        .field("Team", "Supervisory_Organization")
        .fields(&["termination_date"])
}

pub fn is_terminated(row: &Row) -> bool {
    row.text("Employee_Status") == "Terminated"
}

/// Logs the first few rows a branch sees.
fn sample(branch: &'static str) -> Branch {
    let predicate: fn(&Row) -> bool = if branch == "terminated" {
        is_terminated
    } else {
        |row: &Row| !is_terminated(row)
    };
    Branch::new(branch)
        .step(Filter::new(branch, predicate))
        .step(Limit::new(SAMPLE_SIZE))
        .step(FnStep::new("sample", move |row: &Row, _: &StepScope<'_>| {
            info!(
                branch,
                employee = %row.text("EmployeeNo"),
                status = %row.text("Employee_Status"),
                "sample"
            );
            StepOutcome::Keep
        }))
}

pub async fn run_with(
    ctx: &JobContext,
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
) -> Result<RunReport> {
    let pipeline = Pipeline::new("workday_employees", source)
        .step(remap())
        .identity(&["EmployeeNo"])
        .limit(ctx.options.limit)
        .sinks(vec![sink])
        .branch(sample("active"))
        .branch(sample("terminated"));
    Ok(run_single(ctx, "workday_employees", pipeline).await?)
}

/// Dumps the Workday employee report for the badge and Centerstone feeds.
pub struct WorkdayEmployees;

#[async_trait]
impl Job for WorkdayEmployees {
    fn code_identifier(&self) -> &'static str {
        "workday_employees"
    }

    fn description(&self) -> &'static str {
        "Workday employee report written to the SFTP drop as a tab separated file"
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunReport> {
        let source = HttpReportSource::new(ctx.workday().clone(), workday_report(ctx, USERS_REPORT))
            .requiring(&REPORT_FIELDS);
        let sink = ctx.file_sink(
            FileSink::new(ctx.sftp().clone(), ctx.options.file(USERS_FILE))
                .with_header()
                .keyed_by(&["EmployeeNo"]),
        );
        run_with(ctx, Box::new(source), sink).await
    }
}
