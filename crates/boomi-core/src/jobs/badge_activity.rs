// crates/boomi-core/src/jobs/badge_activity.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use boomi_parser::{DelimitedFormat, Row};
use once_cell::sync::Lazy;
use regex::Regex;

use super::Job;
use crate::context::{JobContext, SoftErrorKind};
use crate::filters::ValidityFilter;
use crate::report::RunReport;
use crate::runner::{run_single, Pipeline};
use crate::sink::{Sink, DEFAULT_BUFFER_SIZE};
use crate::source::{FileSource, Source};
use crate::transform::{FnStep, ParseDates, Remap, StepOutcome, StepScope, TransformChain};

pub const DEFAULT_TABLE: &str = "ccure_activity_etl";
pub const DEFAULT_INPUT: &str = "ccure/uploads/BadgeID/Daily Journal Export.txt";
pub const DISCRIMINANT: [&str; 4] = ["activitydate", "badgeid", "username", "location"];

pub const JOURNAL_FIELDS: [&str; 7] = [
    "card_id_field",
    "blank1",
    "timestamp",
    "blank2",
    "name",
    "card_id",
    "location",
];

static CARD_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(Card: (\d+)\)").expect("valid card id pattern"));

/// Badge number from a journal line such as
/// `Admitted 'Doe, Jane' (Card: 50066) at 'Loc' (IN).`
pub fn card_id(text: &str) -> Option<&str> {
    CARD_ID
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str())
}

fn extract_card_id(row: &Row, scope: &StepScope<'_>) -> StepOutcome {
    let line = row.text("card_id_field");
    match card_id(&line) {
        Some(id) => StepOutcome::Replace(row.clone().with("card_id", id)),
        None => scope.reject(
            "card_id",
            SoftErrorKind::Validation,
            "journal entry carries no card number",
            row,
        ),
    }
}

pub fn chain() -> TransformChain {
    TransformChain::new()
        .step(ParseDates::fields(&["timestamp"]))
        .step(FnStep::new("card_id", extract_card_id))
        .step(
            Remap::new("map_fields")
                .field("activitydate", "timestamp")
                .field("badgeid", "card_id")
                .field("username", "name")
                .field("location", "location"),
        )
}

pub fn journal_format() -> DelimitedFormat {
    DelimitedFormat::fixed(b'|', &JOURNAL_FIELDS)
}

pub async fn run_with(
    ctx: &JobContext,
    source: Box<dyn Source>,
    sinks: Vec<Box<dyn Sink>>,
) -> Result<RunReport> {
    let pipeline = Pipeline::new("badge_activity", source)
        .chain(chain())
        .filter(ValidityFilter::discriminant(&DISCRIMINANT))
        .identity(&["name", "timestamp"])
        .limit(ctx.options.limit)
        .sinks(sinks);
    Ok(run_single(ctx, "badge_activity", pipeline).await?)
}

/// Daily badge journal from the access-control export into the activity table.
pub struct BadgeActivity;

#[async_trait]
impl Job for BadgeActivity {
    fn code_identifier(&self) -> &'static str {
        "badge_activity"
    }

    fn description(&self) -> &'static str {
        "Badge reader journal export upserted as card activity"
    }

    fn default_table(&self) -> Option<&'static str> {
        Some(DEFAULT_TABLE)
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunReport> {
        let input = ctx.options.input_file.as_deref().unwrap_or(DEFAULT_INPUT);
        let source = FileSource::delimited(ctx.sftp().clone(), input, journal_format());
        let table = ctx.options.table(DEFAULT_TABLE);
        let sinks = ctx
            .sql_sinks(&table, &DISCRIMINANT, DEFAULT_BUFFER_SIZE)
            .await
            .with_context(|| format!("opening sinks for {table}"))?;
        run_with(ctx, Box::new(source), sinks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::tests::Harness;
    use chrono::NaiveDate;

    fn journal_row(line: &str, timestamp: &str) -> Row {
        Row::new()
            .with("card_id_field", line)
            .with("blank1", "")
            .with("timestamp", timestamp)
            .with("blank2", "")
            .with("name", "Doe, Jane")
            .with("card_id", "")
            .with("location", "Loc")
    }

    #[test]
    fn admitted_entry_maps_to_activity() {
        let harness = Harness::new();
        let out = chain().run(
            journal_row(
                "Admitted 'Doe, Jane' (Card: 50066) at 'Loc' (IN).",
                "9/1/2016 12:00:05 AM",
            ),
            &harness.scope(),
        );
        let expected = Row::new()
            .with(
                "activitydate",
                NaiveDate::from_ymd_opt(2016, 9, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 5)
                    .unwrap(),
            )
            .with("badgeid", "50066")
            .with("username", "Doe, Jane")
            .with("location", "Loc");
        assert_eq!(out, vec![expected]);
    }

    #[test]
    fn rejected_entry_without_card_is_dropped() {
        let harness = Harness::new();
        let out = chain().run(
            journal_row("Rejected 'Nobody' at 'Loc' (IN).", "9/1/2016 8:00:00 AM"),
            &harness.scope(),
        );
        assert!(out.is_empty());
        assert_eq!(harness.errors.snapshot()[0].stage, "card_id");
    }

    #[test]
    fn card_pattern_needs_digits() {
        assert_eq!(card_id("x (Card: 7) y"), Some("7"));
        assert_eq!(card_id("x (Card: ) y"), None);
    }
}
