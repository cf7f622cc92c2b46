// crates/boomi-core/src/transform.rs
use std::collections::HashSet;

use boomi_parser::{parse_datetime, Row, Value};

use crate::cache::{identity_key, CacheSet};
use crate::context::{ErrorChannel, SoftError, SoftErrorKind};
use crate::options::JobOptions;

/// What a step did with the row it was handed.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Drop,
    /// Pass the input through unchanged.
    Keep,
    Replace(Row),
    Expand(Vec<Row>),
}

/// Read-only view a step gets while the main phase runs.
pub struct StepScope<'a> {
    pub caches: &'a CacheSet,
    pub errors: &'a ErrorChannel,
    pub options: &'a JobOptions,
    pub identity_fields: &'a [String],
}

impl StepScope<'_> {
    pub fn identity(&self, row: &Row) -> Option<String> {
        if self.identity_fields.is_empty() {
            return None;
        }
        Some(
            self.identity_fields
                .iter()
                .map(|field| row.text(field))
                .collect::<Vec<_>>()
                .join("|"),
        )
    }

    /// Records a soft error for `row` and returns `Drop`.
    pub fn reject(
        &self,
        stage: &str,
        kind: SoftErrorKind,
        message: impl Into<String>,
        row: &Row,
    ) -> StepOutcome {
        self.errors.report(SoftError {
            stage: stage.to_string(),
            kind,
            message: message.into(),
            identity: self.identity(row),
        });
        StepOutcome::Drop
    }
}

pub trait Step: Send {
    fn name(&self) -> &str;
    fn apply(&mut self, row: &Row, scope: &StepScope<'_>) -> StepOutcome;
}

#[derive(Default)]
pub struct TransformChain {
    steps: Vec<Box<dyn Step>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: Box<dyn Step>) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Feeds `row` through every step. Each output of step n is handed to
    /// step n+1 in emission order.
    pub fn run(&mut self, row: Row, scope: &StepScope<'_>) -> Vec<Row> {
        let mut current = vec![row];
        for step in &mut self.steps {
            let mut next = Vec::with_capacity(current.len());
            for row in current {
                match step.apply(&row, scope) {
                    StepOutcome::Keep => next.push(row),
                    StepOutcome::Drop => {}
                    StepOutcome::Replace(replacement) => next.push(replacement),
                    StepOutcome::Expand(rows) => next.extend(rows),
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

type StepFn = dyn FnMut(&Row, &StepScope<'_>) -> StepOutcome + Send;

pub struct FnStep {
    name: String,
    func: Box<StepFn>,
}

impl FnStep {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: FnMut(&Row, &StepScope<'_>) -> StepOutcome + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, row: &Row, scope: &StepScope<'_>) -> StepOutcome {
        (self.func)(row, scope)
    }
}

/// Renames fields; fields that are absent are left alone.
pub struct Rename {
    pairs: Vec<(String, String)>,
}

impl Rename {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        }
    }
}

impl Step for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn apply(&mut self, row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
        if !self.pairs.iter().any(|(from, _)| row.contains(from)) {
            return StepOutcome::Keep;
        }
        let mut renamed = row.clone();
        for (from, to) in &self.pairs {
            renamed.rename(from, to);
        }
        StepOutcome::Replace(renamed)
    }
}

#[derive(Debug, Clone)]
enum Mapped {
    Field(String),
    Const(Value),
}

/// Builds a new row with exactly the listed fields, in order. Source fields
/// that are absent become null.
pub struct Remap {
    name: String,
    fields: Vec<(String, Mapped)>,
}

impl Remap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Copies `from` into `to`.
    pub fn field(mut self, to: &str, from: &str) -> Self {
        self.fields.push((to.to_string(), Mapped::Field(from.to_string())));
        self
    }

    pub fn fields(mut self, names: &[&str]) -> Self {
        for name in names {
            self = self.field(name, name);
        }
        self
    }

    pub fn constant(mut self, to: &str, value: impl Into<Value>) -> Self {
        self.fields.push((to.to_string(), Mapped::Const(value.into())));
        self
    }

    pub fn map(&self, row: &Row) -> Row {
        let mut mapped = Row::with_capacity(self.fields.len());
        for (to, source) in &self.fields {
            let value = match source {
                Mapped::Field(from) => row.get(from).cloned().unwrap_or(Value::Null),
                Mapped::Const(value) => value.clone(),
            };
            mapped.set(to.as_str(), value);
        }
        mapped
    }
}

impl Step for Remap {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
        StepOutcome::Replace(self.map(row))
    }
}

/// Keeps the first row seen for each key and silently drops repeats.
pub struct Distinct {
    fields: Vec<String>,
    seen: HashSet<String>,
}

impl Distinct {
    pub fn on(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            seen: HashSet::new(),
        }
    }
}

impl Step for Distinct {
    fn name(&self) -> &str {
        "distinct"
    }

    fn apply(&mut self, row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
        let key = identity_key(
            &self
                .fields
                .iter()
                .map(|field| row.text(field))
                .collect::<Vec<_>>(),
        );
        if self.seen.insert(key) {
            StepOutcome::Keep
        } else {
            StepOutcome::Drop
        }
    }
}

#[derive(Debug, Clone)]
enum DateFields {
    Named(Vec<String>),
    NameContains(String),
}

/// Parses date fields in place. Blank values are left as they are; a value
/// that cannot be parsed drops the row.
pub struct ParseDates {
    fields: DateFields,
    as_date: bool,
}

impl ParseDates {
    pub fn fields(fields: &[&str]) -> Self {
        Self {
            fields: DateFields::Named(fields.iter().map(|f| f.to_string()).collect()),
            as_date: false,
        }
    }

    /// Every field whose name contains `needle`.
    pub fn matching(needle: &str) -> Self {
        Self {
            fields: DateFields::NameContains(needle.to_string()),
            as_date: false,
        }
    }

    pub fn as_date(mut self) -> Self {
        self.as_date = true;
        self
    }

    fn selects(&self, field: &str) -> bool {
        match &self.fields {
            DateFields::Named(names) => names.iter().any(|name| name == field),
            DateFields::NameContains(needle) => field.contains(needle.as_str()),
        }
    }
}

impl Step for ParseDates {
    fn name(&self) -> &str {
        "parse_dates"
    }

    fn apply(&mut self, row: &Row, scope: &StepScope<'_>) -> StepOutcome {
        let mut parsed = row.clone();
        let mut changed = false;
        for (field, value) in row.iter() {
            if !self.selects(field) || value.is_blank() {
                continue;
            }
            let Value::Text(text) = value else {
                continue;
            };
            let Some(datetime) = parse_datetime(text) else {
                return scope.reject(
                    "parse_dates",
                    SoftErrorKind::Validation,
                    format!("field '{field}' has unparsable date '{text}'"),
                    row,
                );
            };
            let value = if self.as_date {
                Value::Date(datetime.date())
            } else {
                Value::DateTime(datetime)
            };
            parsed.set(field, value);
            changed = true;
        }
        if changed {
            StepOutcome::Replace(parsed)
        } else {
            StepOutcome::Keep
        }
    }
}

type Predicate = dyn Fn(&Row) -> bool + Send;

/// Keeps rows matching the predicate, silently drops the rest.
pub struct Filter {
    name: String,
    predicate: Box<Predicate>,
}

impl Filter {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
        }
    }
}

impl Step for Filter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
        if (self.predicate)(row) {
            StepOutcome::Keep
        } else {
            StepOutcome::Drop
        }
    }
}

/// Passes the first `limit` rows and drops everything after.
pub struct Limit {
    limit: usize,
    seen: usize,
}

impl Limit {
    pub fn new(limit: usize) -> Self {
        Self { limit, seen: 0 }
    }
}

impl Step for Limit {
    fn name(&self) -> &str {
        "limit"
    }

    fn apply(&mut self, _row: &Row, _scope: &StepScope<'_>) -> StepOutcome {
        if self.seen >= self.limit {
            return StepOutcome::Drop;
        }
        self.seen += 1;
        StepOutcome::Keep
    }
}
