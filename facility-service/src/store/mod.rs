//! Persistence adapter.
//!
//! Entities talk to storage only through [`Tx`], a request-scoped transaction
//! over one of two backends: [`PgStore`] for deployments and [`MemoryStore`]
//! for tests and throwaway instances. Both enforce the unique keys and
//! foreign-key rules declared in each table's [`TableSchema`].

mod memory;
mod postgres;
mod query;
mod schema;
mod value;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use query::{Condition, Direction, Query};
pub use schema::{Column, ColumnType, ForeignKey, OnDelete, Record, TableSchema};
pub use value::{Row, SqlValue};

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: i64 },

    #[error("duplicate value for {table}: {detail}")]
    Duplicate { table: &'static str, detail: String },

    #[error("constraint failed on {table}: {detail}")]
    Constraint { table: &'static str, detail: String },

    #[error("unknown column {table}.{column}")]
    UnknownColumn { table: &'static str, column: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Backend half of a transaction. Object safe; typed access goes through [`Tx`].
///
/// Dropping a `StoreTx` without calling `commit` discards its changes.
#[async_trait]
pub trait StoreTx: Send {
    async fn select_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<Vec<Row>, StoreError>;

    async fn count_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<i64, StoreError>;

    async fn insert_row(&mut self, table: &'static TableSchema, row: Row)
        -> Result<i64, StoreError>;

    async fn update_row(
        &mut self,
        table: &'static TableSchema,
        id: i64,
        row: Row,
    ) -> Result<(), StoreError>;

    async fn delete_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Tx, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Typed view over a backend transaction.
pub struct Tx {
    inner: Box<dyn StoreTx>,
}

impl Tx {
    pub fn new(inner: Box<dyn StoreTx>) -> Self {
        Self { inner }
    }

    pub async fn find<R: Record>(&mut self, id: i64) -> Result<Option<R>, StoreError> {
        self.find_one(Query::new().eq("id", id)).await
    }

    /// Like [`Tx::find`] but a missing row is an error.
    pub async fn get<R: Record>(&mut self, id: i64) -> Result<R, StoreError> {
        self.find(id).await?.ok_or(StoreError::NotFound {
            table: R::TABLE.name,
            id,
        })
    }

    /// Lookup by a single-column unique key.
    pub async fn find_by<R: Record>(
        &mut self,
        column: &'static str,
        value: impl Into<SqlValue>,
    ) -> Result<Option<R>, StoreError> {
        self.find_one(Query::new().eq(column, value)).await
    }

    pub async fn find_one<R: Record>(&mut self, query: Query) -> Result<Option<R>, StoreError> {
        let rows = self.inner.select_rows(R::TABLE, &query.limit(1)).await?;
        rows.first().map(R::from_row).transpose()
    }

    pub async fn list<R: Record>(&mut self, query: Query) -> Result<Vec<R>, StoreError> {
        let rows = self.inner.select_rows(R::TABLE, &query).await?;
        rows.iter().map(R::from_row).collect()
    }

    pub async fn count<R: Record>(&mut self, query: Query) -> Result<i64, StoreError> {
        self.inner.count_rows(R::TABLE, &query).await
    }

    /// Inserts the record and stores the generated id on it.
    pub async fn insert<R: Record>(&mut self, record: &mut R) -> Result<i64, StoreError> {
        let id = self.inner.insert_row(R::TABLE, record.to_row()).await?;
        record.set_id(id);
        Ok(id)
    }

    pub async fn update<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        self.inner
            .update_row(R::TABLE, record.id(), record.to_row())
            .await
    }

    pub async fn delete<R: Record>(&mut self, id: i64) -> Result<(), StoreError> {
        let deleted = self
            .inner
            .delete_rows(R::TABLE, &Query::new().eq("id", id))
            .await?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                table: R::TABLE.name,
                id,
            });
        }
        Ok(())
    }

    pub async fn delete_where<R: Record>(&mut self, query: Query) -> Result<u64, StoreError> {
        self.inner.delete_rows(R::TABLE, &query).await
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

/// Runs `f` in a short transaction of its own, committing on `Ok`.
pub async fn transaction<T, E, F>(store: &dyn Store, f: F) -> Result<T, E>
where
    F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, Result<T, E>> + Send,
    T: Send,
    E: From<StoreError> + Send,
{
    let mut tx = store.begin().await?;
    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}
