// crates/boomi-core/src/jobs/employee_badges.rs
use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use boomi_parser::{DelimitedFormat, Row};

use super::{title_case, Job};
use crate::cache::{identity_key, CollisionPolicy};
use crate::context::{JobContext, SoftErrorKind};
use crate::filters::ValidityFilter;
use crate::report::RunReport;
use crate::runner::{two_phase, CachePhase, Pipeline};
use crate::sink::Sink;
use crate::source::{FileSource, Source};
use crate::transform::{Filter, FnStep, StepOutcome, StepScope, TransformChain};

pub const DEFAULT_TABLE: &str = "f_employee_etl";
pub const BADGE_LIST: &str = "ccure/uploads/BadgeID/ccure_BadgeID_AllButVendor.txt";
pub const USERS_FILE: &str = "metrics-insights/workday-users.csv";
pub const BADGE_CACHE: &str = "badge_ids";
pub const BUFFER_SIZE: usize = 10;
pub const DISCRIMINANT: [&str; 1] = ["badgeid"];

pub const BADGE_FIELDS: [&str; 17] = [
    "badge_id",
    "empty1",
    "last_name",
    "empty2",
    "first_name",
    "empty3",
    "issued_on",
    "empty4",
    "disabled",
    "empty5",
    "valid_until",
    "empty6",
    "flag2",
    "empty7",
    "flag3",
    "empty8",
    "flag4",
];

const USER_FIELDS: [&str; 7] = [
    "employee_id",
    "Last_Name",
    "First_Name",
    "Preffered_Last_Name",
    "Preferred_First_Name",
    "Email",
    "Employee_Status",
];

fn name_key(last: &str, first: &str) -> String {
    identity_key(&[last, first])
}

/// Badge list rows keyed by `last|first`, several badges per name kept.
pub fn badge_cache(source: Box<dyn Source>) -> CachePhase {
    CachePhase::new(BADGE_CACHE, source, CollisionPolicy::MergeIntoSet, |row| {
        Some(name_key(&row.text("last_name"), &row.text("first_name")))
    })
    .step(Filter::new("badge_active", |row: &Row| {
        row.text("disabled") != "True"
    }))
}

/// Every badge id filed under either the legal or the preferred spelling of
/// the employee's last and first name.
fn badge_ids(row: &Row, scope: &StepScope<'_>) -> BTreeSet<String> {
    let lasts = [row.text("Last_Name"), row.text("Preffered_Last_Name")];
    let firsts = [row.text("First_Name"), row.text("Preferred_First_Name")];
    let Some(cache) = scope.caches.get(BADGE_CACHE) else {
        return BTreeSet::new();
    };
    let mut ids = BTreeSet::new();
    for last in lasts.iter().filter(|name| !name.trim().is_empty()) {
        for first in firsts.iter().filter(|name| !name.trim().is_empty()) {
            ids.extend(cache.values(&name_key(last, first), "badge_id"));
        }
    }
    ids
}

fn find_badge_ids(row: &Row, scope: &StepScope<'_>) -> StepOutcome {
    let ids = badge_ids(row, scope);
    if ids.is_empty() {
        return scope.reject(
            "find_badge_ids",
            SoftErrorKind::Lookup,
            "no badge on file for employee",
            row,
        );
    }
    let first_name = title_case(&row.text("First_Name"));
    let last_name = title_case(&row.text("Last_Name"));
    let email = row.get("Email").cloned().unwrap_or_default();
    StepOutcome::Expand(
        ids.into_iter()
            .map(|badge| {
                Row::new()
                    .with("employee_id", row.get("employee_id").cloned().unwrap_or_default())
                    .with("first_name", first_name.clone())
                    .with("last_name", last_name.clone())
                    .with("badgeid", badge)
                    .with("email", email.clone())
            })
            .collect(),
    )
}

pub fn chain() -> TransformChain {
    TransformChain::new()
        .step(Filter::new("employee_active", |row: &Row| {
            row.text("Employee_Status") == "Active"
        }))
        .step(FnStep::new("find_badge_ids", find_badge_ids))
}

pub async fn run_with(
    ctx: &JobContext,
    badges: Box<dyn Source>,
    users: Box<dyn Source>,
    sinks: Vec<Box<dyn Sink>>,
) -> Result<RunReport> {
    let main = Pipeline::new("employee_badges", users)
        .chain(chain())
        .filter(ValidityFilter::discriminant(&DISCRIMINANT))
        .identity(&["employee_id"])
        .limit(ctx.options.limit)
        .sinks(sinks);
    Ok(two_phase(ctx, "employee_badges", vec![badge_cache(badges)], main).await?)
}

/// Links Workday employees to their badge numbers.
pub struct EmployeeBadges;

#[async_trait]
impl Job for EmployeeBadges {
    fn code_identifier(&self) -> &'static str {
        "employee_badges"
    }

    fn description(&self) -> &'static str {
        "Active Workday employees joined to their badge ids by name"
    }

    fn default_table(&self) -> Option<&'static str> {
        Some(DEFAULT_TABLE)
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunReport> {
        let badges = FileSource::delimited(
            ctx.sftp().clone(),
            BADGE_LIST,
            DelimitedFormat::fixed(b'|', &BADGE_FIELDS),
        );
        let users = FileSource::delimited(ctx.sftp().clone(), USERS_FILE, DelimitedFormat::csv())
            .requiring(&USER_FIELDS);
        let table = ctx.options.unsuffixed_table(DEFAULT_TABLE);
        let sinks = ctx
            .sql_sinks(&table, &DISCRIMINANT, BUFFER_SIZE)
            .await
            .with_context(|| format!("opening sinks for {table}"))?;
        run_with(ctx, Box::new(badges), Box::new(users), sinks).await
    }
}
