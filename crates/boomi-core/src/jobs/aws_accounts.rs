// crates/boomi-core/src/jobs/aws_accounts.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use boomi_parser::{Row, Value};

use super::Job;
use crate::context::JobContext;
use crate::filters::ValidityFilter;
use crate::report::RunReport;
use crate::runner::{run_single, Pipeline};
use crate::sink::{Sink, DEFAULT_BUFFER_SIZE};
use crate::source::{HttpRecordsSource, Source};
use crate::transform::{FnStep, StepOutcome, StepScope, TransformChain};

pub const DEFAULT_TABLE: &str = "aws_accounts_etl";
pub const LICENSES_PATH: &str =
    "/alm_license.do?JSONv2&sysparm_query=model%3Da669b9840ffa4200f67ab65be1050e49";
pub const DISCRIMINANT: [&str; 1] = ["linked_account_number"];

/// Account number as an integer; blank means 0 and is filtered out later.
fn account_number(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Int(number)) => Value::Int(*number),
        Some(other) if other.is_blank() => Value::Int(0),
        Some(other) => other
            .as_i64()
            .map(Value::Int)
            .unwrap_or_else(|| Value::Text(other.to_string().trim().to_string())),
        None => Value::Int(0),
    }
}

fn simplify(row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
    StepOutcome::Replace(
        Row::new()
            .with("account_name", row.get("u_account_name").cloned().unwrap_or_default())
            .with("linked_account_number", account_number(row.get("u_account_number")))
            .with("requester", row.get("u_requester").cloned().unwrap_or_default())
            .with("cost_center", row.get("cost_center").cloned().unwrap_or_default()),
    )
}

pub fn chain() -> TransformChain {
    TransformChain::new().step(FnStep::new("simplify", simplify))
}

pub fn validity() -> ValidityFilter {
    ValidityFilter::new()
        .non_zero("linked_account_number")
        .require("cost_center")
}

pub async fn run_with(
    ctx: &JobContext,
    source: Box<dyn Source>,
    sinks: Vec<Box<dyn Sink>>,
) -> Result<RunReport> {
    let pipeline = Pipeline::new("aws_accounts", source)
        .chain(chain())
        .filter(validity())
        .identity(&["account_name"])
        .limit(ctx.options.limit)
        .sinks(sinks);
    Ok(run_single(ctx, "aws_accounts", pipeline).await?)
}

/// AWS accounts registered as licenses in ServiceNow.
pub struct AwsAccounts;

#[async_trait]
impl Job for AwsAccounts {
    fn code_identifier(&self) -> &'static str {
        "aws_accounts"
    }

    fn description(&self) -> &'static str {
        "ServiceNow AWS account licenses with their cost centers"
    }

    fn default_table(&self) -> Option<&'static str> {
        Some(DEFAULT_TABLE)
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunReport> {
        let source = HttpRecordsSource::new(
            ctx.servicenow().clone(),
            ctx.options.servicenow.url(LICENSES_PATH),
            "records",
        )
        .requiring(&["u_account_name", "u_account_number", "cost_center"]);
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

    #[test]
    fn account_number_is_trimmed_to_an_integer() {
        let harness = Harness::new();
        let out = chain().run(
            Row::new()
                .with("u_account_name", "prod")
                .with("u_account_number", " 123456789012 ")
                .with("u_requester", "ops")
                .with("cost_center", "1010"),
            &harness.scope(),
        );
        assert_eq!(out[0].get("linked_account_number"), Some(&Value::Int(123456789012)));
        assert!(validity().check(&out[0]).is_ok());
    }

    #[test]
    fn blank_account_or_cost_center_fails_validity() {
        let blank_number = Row::new()
            .with("linked_account_number", account_number(Some(&Value::from("  "))))
            .with("cost_center", "1020");
        let rejection = validity().check(&blank_number).unwrap_err();
        assert_eq!(rejection.check, "non_zero");

        let no_cost_center = Row::new()
            .with("linked_account_number", 42_i64)
            .with("cost_center", "");
        assert_eq!(validity().check(&no_cost_center).unwrap_err().check, "required");
    }
}
