// crates/boomi-core/src/jobs/mod.rs
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::{info, info_span, Instrument};

use crate::context::JobContext;
use crate::report::RunReport;

pub mod aws_accounts;
pub mod aws_billing;
pub mod badge_activity;
pub mod business_units;
pub mod desk_audit;
pub mod employee_badges;
pub mod vending_tickets;
pub mod workday_employees;

/// Custom Workday report path under the tenant.
pub(crate) fn workday_report(ctx: &JobContext, report: &str) -> String {
    ctx.options.workday.url(&format!(
        "/ccx/service/customreport2/{}/ISU_RAAS/{report}",
        ctx.options.workday_tenant
    ))
}

#[async_trait]
pub trait Job: Send + Sync {
    fn code_identifier(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Table written when no `--table-name` override is given.
    fn default_table(&self) -> Option<&'static str> {
        None
    }
    async fn run(&self, ctx: &JobContext) -> Result<RunReport>;
}

#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub code: &'static str,
    pub description: &'static str,
    pub default_table: Option<&'static str>,
}

static JOBS: Lazy<Vec<&'static dyn Job>> = Lazy::new(|| {
    vec![
        &badge_activity::BadgeActivity as &dyn Job,
        &employee_badges::EmployeeBadges,
        &aws_accounts::AwsAccounts,
        &aws_billing::AwsBilling,
        &desk_audit::DeskAudit,
        &workday_employees::WorkdayEmployees,
        &business_units::BusinessUnits,
        &vending_tickets::VendingTickets,
    ]
});

pub fn all_jobs() -> &'static [&'static dyn Job] {
    JOBS.as_slice()
}

pub fn find_job(code: &str) -> Option<&'static dyn Job> {
    all_jobs()
        .iter()
        .copied()
        .find(|job| job.code_identifier() == code)
}

pub fn all_job_descriptors() -> Vec<JobDescriptor> {
    all_jobs()
        .iter()
        .map(|job| JobDescriptor {
            code: job.code_identifier(),
            description: job.description(),
            default_table: job.default_table(),
        })
        .collect()
}

/// Runs `job` inside a span carrying the job code and run id.
pub async fn run_job(job: &dyn Job, ctx: &JobContext) -> Result<RunReport> {
    let span = info_span!("job", job = job.code_identifier(), run_id = %ctx.run_id);
    async {
        info!(dry_run = ctx.options.dry_run, engines = ?ctx.options.engines, "job started");
        let report = job.run(ctx).await?;
        info!(
            rows_read = report.rows_read(),
            rows_dropped = report.rows_dropped(),
            rows_emitted = report.rows_emitted(),
            soft_errors = report.soft_errors.total,
            "job finished"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}

/// Upper-cases the first letter of every run of letters and lower-cases the
/// rest, so `o'neil mcDONALD` becomes `O'Neil Mcdonald`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_codes_are_unique() {
        let codes: HashSet<_> = all_jobs().iter().map(|job| job.code_identifier()).collect();
        assert_eq!(codes.len(), all_jobs().len());
        assert_eq!(all_job_descriptors().len(), 8);
    }

    #[test]
    fn find_job_by_code() {
        let job = find_job("badge_activity").expect("registered");
        assert_eq!(job.default_table(), Some("ccure_activity_etl"));
        assert!(find_job("sched").is_none());
    }

    #[test]
    fn title_case_handles_apostrophes_and_shouting() {
        assert_eq!(title_case("o'neil mcDONALD"), "O'Neil Mcdonald");
        assert_eq!(title_case("JANE-ANN"), "Jane-Ann");
        assert_eq!(title_case(""), "");
    }
}
