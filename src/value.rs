//! Dynamically typed cell values shared by the CSV loader and query results.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::errors::AnalysisError;

/// One cell of a loaded CSV row or a query result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Rendering without quotes, for single-value answers.
    pub fn plain(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Decode every column of a Postgres row by its runtime type.
    pub fn decode_row(row: &PgRow) -> Result<Vec<Value>, AnalysisError> {
        (0..row.len()).map(|i| Self::decode_column(row, i)).collect()
    }

    fn decode_column(row: &PgRow, index: usize) -> Result<Value, AnalysisError> {
        if row.try_get_raw(index)?.is_null() {
            return Ok(Value::Null);
        }

        let column = row.column(index);
        let value = match column.type_info().name() {
            "BOOL" => Value::Bool(row.try_get(index)?),
            "INT2" => Value::Int(row.try_get::<i16, _>(index)?.into()),
            "INT4" => Value::Int(row.try_get::<i32, _>(index)?.into()),
            "INT8" => Value::Int(row.try_get(index)?),
            "FLOAT4" => Value::Float(row.try_get::<f32, _>(index)?.into()),
            "FLOAT8" => Value::Float(row.try_get(index)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get(index)?),
            "TIMESTAMP" => Value::Timestamp(row.try_get(index)?),
            "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?.naive_utc()),
            "DATE" => Value::Timestamp(
                row.try_get::<NaiveDate, _>(index)?
                    .and_hms_opt(0, 0, 0)
                    .unwrap_or_default(),
            ),
            other => {
                return Err(AnalysisError::UnsupportedType {
                    column: column.name().to_string(),
                    type_name: other.to_string(),
                })
            }
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write_quoted(f, s),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Single quotes, switching to double quotes when the text holds a `'`;
/// a text holding both keeps single quotes and escapes them.
fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    if s.contains('\'') && !s.contains('"') {
        write!(f, "\"{s}\"")
    } else {
        write!(f, "'{}'", s.replace('\'', "\\'"))
    }
}

/// `(v1, v2, ...)` rendering used for list answers.
pub fn format_row(row: &[Value]) -> String {
    let cells: Vec<String> = row.iter().map(Value::to_string).collect();
    format!("({})", cells.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_render_as_tuples() {
        let ts = NaiveDate::from_ymd_opt(2017, 1, 3)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let row = vec![
            Value::Int(7),
            Value::Text("Guns N' Roses".into()),
            Value::Float(1.98),
            Value::Null,
            Value::Timestamp(ts),
        ];
        assert_eq!(
            format_row(&row),
            "(7, \"Guns N' Roses\", 1.98, NULL, 2017-01-03 00:00:00)"
        );
    }

    #[test]
    fn text_with_both_quote_kinds_escapes_single_quotes() {
        assert_eq!(Value::Text("AC/DC".into()).to_string(), "'AC/DC'");
        assert_eq!(
            Value::Text(r#"Don't Say "Never""#.into()).to_string(),
            r#"'Don\'t Say "Never"'"#
        );
    }

    #[test]
    fn plain_drops_quotes() {
        assert_eq!(Value::Text("Rock".into()).plain(), "Rock");
        assert_eq!(Value::Int(42).plain(), "42");
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Text("x".into()).as_f64(), None);
        assert_eq!(Value::Float(2.5).as_i64(), None);
    }
}
