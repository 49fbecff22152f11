use chrono::{DateTime, Utc};

use crate::store::{
    Column, ColumnType, ForeignKey, OnDelete, Record, Row, StoreError, TableSchema,
};

pub static FAILED_AUTHORIZATIONS: TableSchema = TableSchema {
    name: "failed_authorizations",
    columns: &[
        Column::new("attempt_time", ColumnType::Time),
        Column::new("ip", ColumnType::Text),
        Column::nullable("user_id", ColumnType::Int),
    ],
    unique: &[],
    foreign_keys: &[ForeignKey {
        column: "user_id",
        table: "users",
        target: "id",
        on_delete: OnDelete::SetNull,
    }],
};

/// One rejected credential. Append-only; rows age out of the throttle
/// window instead of being deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAuthorization {
    pub id: i64,
    pub attempt_time: DateTime<Utc>,
    pub ip: String,
    pub user_id: Option<i64>,
}

impl Record for FailedAuthorization {
    const TABLE: &'static TableSchema = &FAILED_AUTHORIZATIONS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("attempt_time", self.attempt_time)
            .with("ip", &self.ip)
            .with("user_id", self.user_id)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            attempt_time: row.time("attempt_time")?,
            ip: row.text("ip")?,
            user_id: row.opt_int("user_id")?,
        })
    }
}
