// crates/boomi-core/src/filters.rs
use std::fmt;

use boomi_parser::{parse_datetime, Row, Value};

use crate::context::SoftErrorKind;
use crate::transform::{Step, StepOutcome, StepScope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowCheck {
    /// Present and not blank.
    Required(String),
    /// Present, not blank and not numerically zero.
    NonZero(String),
    /// A date value, or text that parses as one.
    Date(String),
}

impl RowCheck {
    pub fn field(&self) -> &str {
        match self {
            RowCheck::Required(field)
            | RowCheck::NonZero(field)
            | RowCheck::Date(field) => field,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RowCheck::Required(_) => "required",
            RowCheck::NonZero(_) => "non_zero",
            RowCheck::Date(_) => "date",
        }
    }

    pub fn passes(&self, row: &Row) -> bool {
        let Some(value) = row.get(self.field()) else {
            return false;
        };
        match self {
            RowCheck::Required(_) => !value.is_blank(),
            RowCheck::NonZero(_) => !value.is_blank() && value.as_f64() != Some(0.0),
            RowCheck::Date(_) => match value {
                Value::Date(_) | Value::DateTime(_) => true,
                Value::Text(text) => parse_datetime(text).is_some(),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub check: &'static str,
    pub field: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed {} check on '{}'", self.check, self.field)
    }
}

/// Conjunction of row checks applied just before rows reach the sinks.
#[derive(Debug, Clone, Default)]
pub struct ValidityFilter {
    checks: Vec<RowCheck>,
}

impl ValidityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `Required` check per discriminant field.
    pub fn discriminant(fields: &[&str]) -> Self {
        fields
            .iter()
            .fold(Self::new(), |filter, field| filter.require(field))
    }

    pub fn require(self, field: &str) -> Self {
        self.with(RowCheck::Required(field.to_string()))
    }

    pub fn non_zero(self, field: &str) -> Self {
        self.with(RowCheck::NonZero(field.to_string()))
    }

    pub fn date(self, field: &str) -> Self {
        self.with(RowCheck::Date(field.to_string()))
    }

    pub fn with(mut self, check: RowCheck) -> Self {
        self.checks.push(check);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn checks(&self) -> &[RowCheck] {
        &self.checks
    }

    /// First failing check, if any.
    pub fn check(&self, row: &Row) -> Result<(), Rejection> {
        match self.checks.iter().find(|check| !check.passes(row)) {
            Some(check) => Err(Rejection {
                check: check.label(),
                field: check.field().to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// A validity filter used mid-chain: failures drop the row with a soft error.
pub struct ValidityStep {
    name: String,
    filter: ValidityFilter,
}

impl ValidityStep {
    pub fn new(name: impl Into<String>, filter: ValidityFilter) -> Self {
        Self {
            name: name.into(),
            filter,
        }
    }
}

impl Step for ValidityStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, row: &Row, scope: &StepScope<'_>) -> StepOutcome {
        match self.filter.check(row) {
            Ok(()) => StepOutcome::Keep,
            Err(rejection) => {
                scope.reject(&self.name, SoftErrorKind::Validation, rejection.to_string(), row)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::tests::Harness;
    use crate::transform::TransformChain;

    #[test]
    fn first_failure_wins() {
        let filter = ValidityFilter::new()
            .non_zero("linked_account_number")
            .require("cost_center");
        let row = Row::new()
            .with("linked_account_number", 0_i64)
            .with("cost_center", "");
        assert_eq!(
            filter.check(&row),
            Err(Rejection {
                check: "non_zero",
                field: "linked_account_number".to_string()
            })
        );

        let row = Row::new()
            .with("linked_account_number", "123456789012")
            .with("cost_center", "");
        assert_eq!(filter.check(&row).unwrap_err().field, "cost_center");
    }

    #[test]
    fn discriminant_requires_every_field() {
        let filter = ValidityFilter::discriminant(&["activitydate", "badgeid"]);
        assert_eq!(filter.checks().len(), 2);
        assert!(filter
            .check(&Row::new().with("activitydate", "2016-09-01"))
            .is_err());
        assert!(filter
            .check(&Row::new().with("activitydate", "x").with("badgeid", 50066_i64))
            .is_ok());
    }

    #[test]
    fn date_check_accepts_values_and_parseable_text() {
        let row = Row::new()
            .with("invoicedate", "2016-09-01")
            .with("recordtype", "LinkedLineItem");
        assert!(RowCheck::Date("invoicedate".into()).passes(&row));
        assert!(!RowCheck::Date("recordtype".into()).passes(&row));
        assert!(!RowCheck::Required("missing".into()).passes(&row));
    }

    #[test]
    fn validity_step_reports_soft_errors() {
        let harness = Harness::new();
        let mut chain = TransformChain::new().step(ValidityStep::new(
            "invalid_entries",
            ValidityFilter::new().require("linkedaccountid"),
        ));
        let out = chain.run(
            Row::new().with("id", "R4").with("linkedaccountid", ""),
            &harness.scope(),
        );
        assert!(out.is_empty());
        let errors = harness.errors.snapshot();
        assert_eq!(errors[0].stage, "invalid_entries");
        assert_eq!(errors[0].identity.as_deref(), Some("R4"));
    }
}
