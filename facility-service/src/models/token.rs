use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

use crate::store::{
    Column, ColumnType, ForeignKey, OnDelete, Record, Row, StoreError, TableSchema,
};

pub static TOKENS: TableSchema = TableSchema {
    name: "tokens",
    columns: &[
        Column::new("user_id", ColumnType::Int),
        Column::new("kind", ColumnType::Text),
        Column::new("token_hash", ColumnType::Text),
        Column::new("expires_at", ColumnType::Time),
    ],
    unique: &[],
    foreign_keys: &[ForeignKey {
        column: "user_id",
        table: "users",
        target: "id",
        on_delete: OnDelete::Cascade,
    }],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Api,
    Cookie,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Api => "api",
            TokenKind::Cookie => "cookie",
        }
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(TokenKind::Api),
            "cookie" => Ok(TokenKind::Cookie),
            other => Err(format!("Unknown token kind: {}", other)),
        }
    }
}

/// Stored half of a bearer token. The secret itself is never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub id: i64,
    pub user_id: i64,
    pub kind: TokenKind,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Record for Token {
    const TABLE: &'static TableSchema = &TOKENS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("user_id", self.user_id)
            .with("kind", self.kind.as_str())
            .with("token_hash", &self.token_hash)
            .with("expires_at", self.expires_at)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            user_id: row.int("user_id")?,
            kind: row.text("kind")?.parse().map_err(StoreError::Decode)?,
            token_hash: row.text("token_hash")?,
            expires_at: row.time("expires_at")?,
        })
    }
}
