//! The data model shared by the filter and select compilers: column
//! descriptions for schema-aware compilation and a dynamically typed cell
//! value for the in-memory backend.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::SemanticError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String,
    Boolean,
    Integer8,
    Integer16,
    Integer32,
    Integer64,
    Float32,
    Float64,
    Decimal,
    Time,
    Date,
    DateTime,
    Guid,
    Json,
    Binary,
    RowVersion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataColumn {
    pub column_name: String,
    pub data_type: DataType,
    pub data_length: Option<u32>,
    pub primary_key: bool,
    pub order: usize,
}

impl DataColumn {
    pub fn new(column_name: &str, data_type: DataType) -> Self {
        DataColumn {
            column_name: column_name.to_string(),
            data_type,
            data_length: None,
            primary_key: false,
            order: 0,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.data_length = Some(length);
        self
    }
}

/// A value bound to a generated `@P{n}` placeholder. `IN` binds a whole
/// list under a single placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Scalar(String),
    List(Vec<String>),
}

/// One cell of an in-memory row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

pub type Row = HashMap<String, Value>;

impl Value {
    /// Compares a cell against a literal written in an expression, e.g.
    /// `AMOUNT GT 12.5`. The literal is interpreted in the cell's own type;
    /// an unparseable literal or a `Null` cell yields `None`, which every
    /// comparison treats as a non-match.
    pub fn compare_literal(&self, literal: &str) -> Option<Ordering> {
        match self {
            Value::Null => None,
            Value::Bool(b) => {
                let other = match literal.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return None,
                };
                Some(b.cmp(&other))
            }
            Value::Int(i) => {
                let other: f64 = literal.trim().parse().ok()?;
                (*i as f64).partial_cmp(&other)
            }
            Value::Float(f) => {
                let other: f64 = literal.trim().parse().ok()?;
                f.partial_cmp(&other)
            }
            Value::Text(s) => Some(s.as_str().cmp(literal)),
            Value::Date(d) => {
                let other = NaiveDate::parse_from_str(literal.trim(), "%Y-%m-%d").ok()?;
                Some(d.cmp(&other))
            }
            Value::Timestamp(t) => {
                let trimmed = literal.trim();
                let other = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
                    .ok()
                    .or_else(|| {
                        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                    })?;
                Some(t.cmp(&other))
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Text rendering used by substring matching.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

/// Case-insensitive column lookup, returning the position and the canonical
/// spelling from the schema.
pub(crate) fn resolve_column(
    columns: &[String],
    name: &str,
) -> Result<(usize, String), SemanticError> {
    columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(name))
        .map(|i| (i, columns[i].clone()))
        .ok_or_else(|| SemanticError::UnknownColumn(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_comparison_is_typed() {
        assert_eq!(
            Value::Int(10).compare_literal("9.5"),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Text("10".into()).compare_literal("9"), Some(Ordering::Less));
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
                .compare_literal("2024-02-29"),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Null.compare_literal("anything"), None);
        assert_eq!(Value::Int(1).compare_literal("not a number"), None);
    }

    #[test]
    fn blankness() {
        assert!(Value::Null.is_blank());
        assert!(Value::Text(String::new()).is_blank());
        assert!(!Value::Text(" ".into()).is_blank());
        assert!(!Value::Int(0).is_blank());
    }

    #[test]
    fn column_resolution_ignores_case() {
        let columns = vec!["Id".to_string(), "Name".to_string()];
        assert_eq!(resolve_column(&columns, "NAME").unwrap(), (1, "Name".into()));
        assert!(resolve_column(&columns, "missing").is_err());
    }
}
