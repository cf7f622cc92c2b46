// crates/boomi-core/src/jobs/vending_tickets.rs
use anyhow::Result;
use async_trait::async_trait;
use boomi_parser::{Row, Value};
use chrono::NaiveDateTime;
use tracing::info;

use super::Job;
use crate::context::JobContext;
use crate::db::Dialect;
use crate::error::PipelineError;
use crate::report::RunReport;
use crate::runner::{run_single, Pipeline};
use crate::sink::Sink;
use crate::source::{Source, SqlSource};
use crate::transform::{Filter, FnStep, Remap, StepOutcome, StepScope, TransformChain};

pub const TICKETS_PATH: &str =
    "/u_mozilla_vending_webservice.do?JSONv2&sysparm_action=insertMultiple";
const DAYS_BACK: i64 = 2;

/// Vending transactions of one day joined to the employee owning the badge.
pub fn transactions_query(dialect: Dialect, day: NaiveDateTime) -> String {
    format!(
        "select a.badgeid AS badgeid, b.user_id AS user_id, a.employee_id AS employee_id, \
         a.email AS email, b.item_description AS item_description, b.item_number AS item_number, \
         {} AS transaction_date, b.transaction_id AS transaction_id, \
         b.description AS description, '' AS drawer_id, b.quantity AS quantity \
         from ivm b, (select badgeid, email, employee_id from f_employee \
         group by badgeid, email, employee_id) a \
         where b.user_id = a.badgeid and b.transaction_date = '{}'",
        dialect.cast_text("b.transaction_date"),
        day.format("%Y-%m-%d %H:%M:%S"),
    )
}

fn trim_employee_id(row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
    match row.get("employee_id").and_then(Value::as_str) {
        Some(id) if id.trim() != id => {
            let trimmed = id.trim().to_string();
            StepOutcome::Replace(row.clone().with("employee_id", trimmed))
        }
        _ => StepOutcome::Keep,
    }
}

pub fn payload() -> Remap {
    Remap::new("format_payload")
        .field("u_badgenumber", "badgeid")
        .field("u_employeeid", "employee_id")
        .field("u_ldapaccount", "email")
        .field("u_transactionid", "transaction_id")
        .field("u_datetimevended", "transaction_date")
        .field("u_product", "item_description")
        .field("u_vendingmachineid", "description")
        .field("u_itemnumber", "item_number")
}

pub fn chain() -> TransformChain {
    TransformChain::new()
        .step(FnStep::new("trim_employee_id", trim_employee_id))
        .step(Filter::new("invalid_badge_id", |row: &Row| {
            row.get("badgeid").and_then(Value::as_i64) != Some(0)
        }))
        .step(Filter::new("invalid_email", |row: &Row| {
            !row.text("email").is_empty()
        }))
        .step(payload())
}

pub async fn run_with(
    ctx: &JobContext,
    source: Box<dyn Source>,
    tickets: Box<dyn Sink>,
) -> Result<RunReport> {
    let pipeline = Pipeline::new("vending_tickets", source)
        .chain(chain())
        .identity(&["transaction_id"])
        .limit(ctx.options.limit)
        .sinks(vec![tickets]);
    Ok(run_single(ctx, "vending_tickets", pipeline).await?)
}

/// Raises a ServiceNow ticket per vending machine transaction.
pub struct VendingTickets;

#[async_trait]
impl Job for VendingTickets {
    fn code_identifier(&self) -> &'static str {
        "vending_tickets"
    }

    fn description(&self) -> &'static str {
        "Vending machine transactions from two days ago posted as ServiceNow tickets"
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunReport> {
        let day = ctx.options.days_back(DAYS_BACK);
        info!(day = %day.date(), "processing vending transactions");
        let engine = ctx
            .options
            .engines
            .first()
            .cloned()
            .ok_or_else(|| PipelineError::Config("no engine selected".into()))?;
        let source = SqlSource::new(engine, move |dialect| transactions_query(dialect, day));
        let tickets = ctx.ticket_sink(ctx.options.servicenow.url(TICKETS_PATH));
        run_with(ctx, Box::new(source), tickets).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::tests::Harness;

    fn transaction() -> Row {
        Row::new()
            .with("badgeid", 50066_i64)
            .with("user_id", 50066_i64)
            .with("employee_id", " 1001 ")
            .with("email", "jdoe@example.com")
            .with("item_description", "USB-C cable")
            .with("item_number", "A4")
            .with("transaction_date", "2024-03-13 00:00:00")
            .with("transaction_id", 991_i64)
            .with("description", "SF-3")
            .with("drawer_id", "")
            .with("quantity", 1_i64)
    }

    #[test]
    fn payload_carries_trimmed_employee_id() {
        let harness = Harness::new();
        let out = chain().run(transaction(), &harness.scope());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text("u_employeeid"), "1001");
        assert_eq!(out[0].get("u_badgenumber"), Some(&Value::Int(50066)));
        assert_eq!(out[0].text("u_datetimevended"), "2024-03-13 00:00:00");
        assert_eq!(out[0].len(), 8);
    }

    #[test]
    fn zero_badge_and_blank_email_are_dropped() {
        let harness = Harness::new();
        assert!(chain()
            .run(transaction().with("badgeid", 0_i64), &harness.scope())
            .is_empty());
        assert!(chain()
            .run(transaction().with("email", ""), &harness.scope())
            .is_empty());
        assert!(harness.errors.is_empty());
    }

    #[test]
    fn query_targets_the_requested_day() {
        let day =
            NaiveDateTime::parse_from_str("2024-03-13 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let sql = transactions_query(Dialect::MySql, day);
        assert!(sql.contains("CAST(b.transaction_date AS CHAR) AS transaction_date"));
        assert!(sql.ends_with("b.transaction_date = '2024-03-13 00:00:00'"));
    }
}
