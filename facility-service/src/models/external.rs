use chrono::{DateTime, Utc};
use serde::Serialize;

use super::fields::{FieldKind, FieldSpec};
use crate::services::ServiceError;
use crate::store::{
    Column, ColumnType, Direction, ForeignKey, OnDelete, Query, Record, Row, StoreError,
    TableSchema, Tx,
};

pub static EXTERNAL_ACCOUNTS: TableSchema = TableSchema {
    name: "external_accounts",
    columns: &[
        Column::new("user_id", ColumnType::Int),
        Column::new("provider", ColumnType::Text),
        Column::new("account_key", ColumnType::Text),
    ],
    unique: &[&["provider", "account_key"]],
    foreign_keys: &[ForeignKey {
        column: "user_id",
        table: "users",
        target: "id",
        on_delete: OnDelete::Cascade,
    }],
};

pub static EXTERNAL_SESSIONS: TableSchema = TableSchema {
    name: "external_sessions",
    columns: &[
        Column::new("provider", ColumnType::Text),
        Column::new("session_key_hash", ColumnType::Text),
        Column::new("expires_at", ColumnType::Time),
    ],
    unique: &[],
    foreign_keys: &[],
};

pub const PROVIDER: FieldSpec = FieldSpec::new("provider", FieldKind::Slug).length(1, 64);
pub const ACCOUNT_KEY: FieldSpec = FieldSpec::new("account_key", FieldKind::Text).length(1, 256);

/// Link between a local user and an identity at an external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalAccount {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub account_key: String,
}

impl ExternalAccount {
    pub fn new(user_id: i64, provider: &str, account_key: &str) -> Result<Self, ServiceError> {
        PROVIDER.check_text(provider)?;
        ACCOUNT_KEY.check_text(account_key)?;
        Ok(Self {
            id: 0,
            user_id,
            provider: provider.to_string(),
            account_key: account_key.to_string(),
        })
    }

    pub async fn create(&mut self, tx: &mut Tx) -> Result<(), ServiceError> {
        tx.insert(self).await?;
        tracing::info!(
            user_id = self.user_id,
            provider = %self.provider,
            "External account linked"
        );
        Ok(())
    }

    pub async fn delete(&self, tx: &mut Tx) -> Result<(), ServiceError> {
        tx.delete::<ExternalAccount>(self.id).await?;
        tracing::info!(user_id = self.user_id, provider = %self.provider, "External account unlinked");
        Ok(())
    }

    pub async fn find(tx: &mut Tx, provider: &str, account_key: &str) -> Result<Option<ExternalAccount>, ServiceError> {
        Ok(tx
            .find_one::<ExternalAccount>(
                Query::new()
                    .eq("provider", provider)
                    .eq("account_key", account_key),
            )
            .await?)
    }

    pub async fn list_for_user(tx: &mut Tx, user_id: i64) -> Result<Vec<ExternalAccount>, ServiceError> {
        Ok(tx
            .list::<ExternalAccount>(
                Query::new()
                    .eq("user_id", user_id)
                    .order_by("provider", Direction::Asc),
            )
            .await?)
    }
}

impl Record for ExternalAccount {
    const TABLE: &'static TableSchema = &EXTERNAL_ACCOUNTS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("user_id", self.user_id)
            .with("provider", &self.provider)
            .with("account_key", &self.account_key)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            user_id: row.int("user_id")?,
            provider: row.text("provider")?,
            account_key: row.text("account_key")?,
        })
    }
}

/// Pending redirect to an external provider, consumed by its callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSession {
    pub id: i64,
    pub provider: String,
    pub session_key_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl Record for ExternalSession {
    const TABLE: &'static TableSchema = &EXTERNAL_SESSIONS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("provider", &self.provider)
            .with("session_key_hash", &self.session_key_hash)
            .with("expires_at", self.expires_at)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            provider: row.text("provider")?,
            session_key_hash: row.text("session_key_hash")?,
            expires_at: row.time("expires_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(ExternalAccount::new(1, "orcid", "0000-0002-1825-0097").is_ok());
        assert!(ExternalAccount::new(1, "bad provider", "k").is_err());
        assert!(ExternalAccount::new(1, "orcid", "").is_err());
    }
}
