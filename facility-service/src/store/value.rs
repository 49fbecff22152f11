use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::StoreError;

/// A single column value as moved between entities and backends.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Bool(bool),
    Text(String),
    Time(DateTime<Utc>),
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    fn variant_rank(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Bool(_) => 1,
            SqlValue::Int(_) => 2,
            SqlValue::Text(_) => 3,
            SqlValue::Time(_) => 4,
            SqlValue::Json(_) => 5,
        }
    }

    /// Total order used for sorting and range filters. NULL sorts first.
    pub fn compare(&self, other: &SqlValue) -> Ordering {
        match (self, other) {
            (SqlValue::Int(a), SqlValue::Int(b)) => a.cmp(b),
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a.cmp(b),
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (SqlValue::Time(a), SqlValue::Time(b)) => a.cmp(b),
            (SqlValue::Json(a), SqlValue::Json(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) => a.variant_rank().cmp(&b.variant_rank()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Time(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Column name to value map for one table row. The primary key travels
/// under `id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(BTreeMap<&'static str, SqlValue>);

static NULL: SqlValue = SqlValue::Null;

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.0.insert(column, value.into());
        self
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) {
        self.0.insert(column, value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        self.0.remove(column)
    }

    pub fn get(&self, column: &str) -> &SqlValue {
        self.0.get(column).unwrap_or(&NULL)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SqlValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn id(&self) -> Result<i64, StoreError> {
        self.int("id")
    }

    pub fn int(&self, column: &str) -> Result<i64, StoreError> {
        self.opt_int(column)?
            .ok_or_else(|| StoreError::Decode(format!("column {} is null", column)))
    }

    pub fn opt_int(&self, column: &str) -> Result<Option<i64>, StoreError> {
        match self.get(column) {
            SqlValue::Null => Ok(None),
            SqlValue::Int(v) => Ok(Some(*v)),
            other => Err(mismatch(column, "integer", other)),
        }
    }

    pub fn bool(&self, column: &str) -> Result<bool, StoreError> {
        match self.get(column) {
            SqlValue::Bool(v) => Ok(*v),
            other => Err(mismatch(column, "boolean", other)),
        }
    }

    pub fn text(&self, column: &str) -> Result<String, StoreError> {
        self.opt_text(column)?
            .ok_or_else(|| StoreError::Decode(format!("column {} is null", column)))
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>, StoreError> {
        match self.get(column) {
            SqlValue::Null => Ok(None),
            SqlValue::Text(v) => Ok(Some(v.clone())),
            other => Err(mismatch(column, "text", other)),
        }
    }

    pub fn time(&self, column: &str) -> Result<DateTime<Utc>, StoreError> {
        self.opt_time(column)?
            .ok_or_else(|| StoreError::Decode(format!("column {} is null", column)))
    }

    pub fn opt_time(&self, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.get(column) {
            SqlValue::Null => Ok(None),
            SqlValue::Time(v) => Ok(Some(*v)),
            other => Err(mismatch(column, "timestamp", other)),
        }
    }

    pub fn json(&self, column: &str) -> Result<serde_json::Value, StoreError> {
        match self.get(column) {
            SqlValue::Null => Ok(serde_json::Value::Null),
            SqlValue::Json(v) => Ok(v.clone()),
            other => Err(mismatch(column, "json", other)),
        }
    }
}

fn mismatch(column: &str, expected: &str, found: &SqlValue) -> StoreError {
    StoreError::Decode(format!(
        "column {} expected {}, found {:?}",
        column, expected, found
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_reads_as_null() {
        let row = Row::new().with("login", "alice");
        assert_eq!(row.opt_text("email").unwrap(), None);
        assert!(row.int("id").is_err());
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let row = Row::new().with("is_locked", "yes");
        assert!(matches!(row.bool("is_locked"), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_null_sorts_first() {
        let mut values = vec![SqlValue::Int(3), SqlValue::Null, SqlValue::Int(1)];
        values.sort_by(|a, b| a.compare(b));
        assert_eq!(values, vec![SqlValue::Null, SqlValue::Int(1), SqlValue::Int(3)]);
    }
}
