// crates/boomi-core/src/upsert.rs
use boomi_parser::{Row, Value};
use chrono::NaiveDate;
use sqlx::any::AnyArguments;
use sqlx::query::Query;
use sqlx::Any;

use crate::db::Dialect;

/// A statement with the values bound to its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl Statement {
    pub fn query(&self) -> Query<'_, Any, AnyArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for value in &self.binds {
            query = match value {
                Value::Null => query.bind(Option::<String>::None),
                Value::Text(text) => query.bind(text.as_str()),
                Value::Int(int) => query.bind(*int),
                Value::Float(float) => query.bind(*float),
                Value::Bool(flag) => query.bind(*flag),
                Value::Date(_) | Value::DateTime(_) => query.bind(value.to_string()),
            };
        }
        query
    }
}

struct Builder {
    dialect: Dialect,
    sql: String,
    binds: Vec<Value>,
}

impl Builder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            binds: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Appends a placeholder for `value`, or a literal NULL.
    fn value(&mut self, value: &Value) {
        if value.is_null() {
            self.sql.push_str("NULL");
            return;
        }
        self.binds.push(value.clone());
        let placeholder = match self.dialect {
            Dialect::Postgres => format!("${}", self.binds.len()),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        };
        let rendered = match (value, self.dialect) {
            (Value::Date(_), Dialect::Postgres | Dialect::MySql) => {
                format!("CAST({placeholder} AS DATE)")
            }
            (Value::DateTime(_), Dialect::Postgres) => format!("CAST({placeholder} AS TIMESTAMP)"),
            (Value::DateTime(_), Dialect::MySql) => format!("CAST({placeholder} AS DATETIME)"),
            _ => placeholder,
        };
        self.sql.push_str(&rendered);
    }

    fn predicate(&mut self, columns: &[String], row: &Row) {
        for (idx, column) in columns.iter().enumerate() {
            if idx > 0 {
                self.push(" AND ");
            }
            self.push(&quote_ident(self.dialect, column));
            self.push(" = ");
            self.value(row.get(column).unwrap_or(&Value::Null));
        }
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            binds: self.binds,
        }
    }
}

/// Quotes a possibly schema-qualified identifier.
pub fn quote_ident(dialect: Dialect, name: &str) -> String {
    name.split('.')
        .map(|part| match dialect {
            Dialect::MySql => format!("`{}`", part.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", part.replace('"', "\"\"")),
        })
        .collect::<Vec<_>>()
        .join(".")
}

pub fn select_existing(
    dialect: Dialect,
    table: &str,
    discriminant: &[String],
    row: &Row,
) -> Statement {
    let mut builder = Builder::new(dialect);
    builder.push("SELECT 1 FROM ");
    builder.push(&quote_ident(dialect, table));
    builder.push(" WHERE ");
    builder.predicate(discriminant, row);
    builder.push(" LIMIT 1");
    builder.finish()
}

/// `None` when the row carries nothing beyond its discriminant.
pub fn update(
    dialect: Dialect,
    table: &str,
    discriminant: &[String],
    row: &Row,
) -> Option<Statement> {
    let columns: Vec<(&str, &Value)> = row
        .iter()
        .filter(|(field, _)| !discriminant.iter().any(|key| key == field))
        .collect();
    if columns.is_empty() {
        return None;
    }

    let mut builder = Builder::new(dialect);
    builder.push("UPDATE ");
    builder.push(&quote_ident(dialect, table));
    builder.push(" SET ");
    for (idx, (field, value)) in columns.into_iter().enumerate() {
        if idx > 0 {
            builder.push(", ");
        }
        builder.push(&quote_ident(dialect, field));
        builder.push(" = ");
        builder.value(value);
    }
    builder.push(" WHERE ");
    builder.predicate(discriminant, row);
    Some(builder.finish())
}

pub fn insert(dialect: Dialect, table: &str, row: &Row) -> Statement {
    let mut builder = Builder::new(dialect);
    builder.push("INSERT INTO ");
    builder.push(&quote_ident(dialect, table));
    builder.push(" (");
    let columns: Vec<String> = row.fields().map(|field| quote_ident(dialect, field)).collect();
    builder.push(&columns.join(", "));
    builder.push(") VALUES (");
    for (idx, (_, value)) in row.iter().enumerate() {
        if idx > 0 {
            builder.push(", ");
        }
        builder.value(value);
    }
    builder.push(")");
    builder.finish()
}

fn before(mut builder: Builder, table: &str, column: &str, cutoff: NaiveDate) -> Statement {
    let dialect = builder.dialect;
    builder.push(&quote_ident(dialect, table));
    builder.push(" WHERE ");
    builder.push(&quote_ident(dialect, column));
    builder.push(" < ");
    builder.value(&Value::Date(cutoff));
    builder.finish()
}

/// Retention delete of rows whose `column` date is before `cutoff`.
pub fn delete_before(dialect: Dialect, table: &str, column: &str, cutoff: NaiveDate) -> Statement {
    let mut builder = Builder::new(dialect);
    builder.push("DELETE FROM ");
    before(builder, table, column, cutoff)
}

pub fn count_before(dialect: Dialect, table: &str, column: &str, cutoff: NaiveDate) -> Statement {
    let mut builder = Builder::new(dialect);
    builder.push("SELECT COUNT(1) FROM ");
    before(builder, table, column, cutoff)
}
