use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::{Postgres, Row as _};

use super::{
    ColumnType, Condition, Direction, Query, Row, SqlValue, Store, StoreError, StoreTx,
    TableSchema, Tx,
};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL backend. One pooled connection per open transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
        Ok(Tx::new(Box::new(PgTx { tx })))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?;
        Ok(())
    }
}

struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn map_db_error(table: &'static str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        let detail = db
            .constraint()
            .map(str::to_string)
            .unwrap_or_else(|| db.message().to_string());
        match db.code().as_deref() {
            Some("23505") => return StoreError::Duplicate { table, detail },
            Some("23503") => return StoreError::Constraint { table, detail },
            _ => {}
        }
    }
    StoreError::Backend(anyhow::Error::new(e))
}

/// Accumulates positional parameters alongside the SQL text.
struct SqlBuilder {
    sql: String,
    params: Vec<(SqlValue, ColumnType)>,
}

impl SqlBuilder {
    fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn param(&mut self, value: SqlValue, ty: ColumnType) -> String {
        self.params.push((value, ty));
        format!("${}", self.params.len())
    }

    fn push_where(&mut self, table: &TableSchema, query: &Query) -> Result<(), StoreError> {
        if query.conditions.is_empty() {
            return Ok(());
        }

        let mut clauses = Vec::with_capacity(query.conditions.len());
        for condition in &query.conditions {
            let column = condition.column();
            let ty = table.column_type(column)?;
            let clause = match condition {
                Condition::Eq(_, v) => format!("{} = {}", column, self.param(v.clone(), ty)),
                Condition::Ne(_, v) => format!("{} IS DISTINCT FROM {}", column, self.param(v.clone(), ty)),
                Condition::Lt(_, v) => format!("{} < {}", column, self.param(v.clone(), ty)),
                Condition::Gt(_, v) => format!("{} > {}", column, self.param(v.clone(), ty)),
                Condition::In(_, values) if values.is_empty() => "FALSE".to_string(),
                Condition::In(_, values) => {
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|v| self.param(v.clone(), ty))
                        .collect();
                    format!("{} IN ({})", column, placeholders.join(", "))
                }
                Condition::IsNull(_) => format!("{} IS NULL", column),
            };
            clauses.push(clause);
        }

        self.sql.push_str(" WHERE ");
        self.sql.push_str(&clauses.join(" AND "));
        Ok(())
    }

    fn push_tail(&mut self, table: &TableSchema, query: &Query) -> Result<(), StoreError> {
        if !query.order.is_empty() {
            let mut parts = Vec::with_capacity(query.order.len());
            for (column, direction) in &query.order {
                table.column_type(column)?;
                let dir = match direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                parts.push(format!("{} {}", column, dir));
            }
            self.sql.push_str(" ORDER BY ");
            self.sql.push_str(&parts.join(", "));
        }
        if let Some(limit) = query.limit {
            self.sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }
        if let Some(offset) = query.offset {
            self.sql.push_str(&format!(" OFFSET {}", offset.max(0)));
        }
        if query.for_update {
            self.sql.push_str(" FOR UPDATE");
        }
        Ok(())
    }

    fn build(&self) -> PgQuery<'_> {
        let mut query = sqlx::query(&self.sql);
        for (value, ty) in &self.params {
            query = match (value.clone(), ty) {
                (SqlValue::Null, ColumnType::Int) => query.bind(None::<i64>),
                (SqlValue::Null, ColumnType::Bool) => query.bind(None::<bool>),
                (SqlValue::Null, ColumnType::Text) => query.bind(None::<String>),
                (SqlValue::Null, ColumnType::Time) => query.bind(None::<DateTime<Utc>>),
                (SqlValue::Null, ColumnType::Json) => query.bind(None::<serde_json::Value>),
                (SqlValue::Int(v), _) => query.bind(v),
                (SqlValue::Bool(v), _) => query.bind(v),
                (SqlValue::Text(v), _) => query.bind(v),
                (SqlValue::Time(v), _) => query.bind(v),
                (SqlValue::Json(v), _) => query.bind(v),
            };
        }
        query
    }
}

fn select_list(table: &TableSchema) -> String {
    std::iter::once("id")
        .chain(table.columns.iter().map(|c| c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn decode_row(table: &'static TableSchema, pg: &PgRow) -> Result<Row, StoreError> {
    let id: i64 = pg.try_get("id").map_err(|e| map_db_error(table.name, e))?;
    let mut row = Row::new().with("id", id);

    for column in table.columns {
        let value = match column.ty {
            ColumnType::Int => pg.try_get::<Option<i64>, _>(column.name).map(SqlValue::from),
            ColumnType::Bool => pg.try_get::<Option<bool>, _>(column.name).map(SqlValue::from),
            ColumnType::Text => pg.try_get::<Option<String>, _>(column.name).map(SqlValue::from),
            ColumnType::Time => pg
                .try_get::<Option<DateTime<Utc>>, _>(column.name)
                .map(SqlValue::from),
            ColumnType::Json => pg
                .try_get::<Option<serde_json::Value>, _>(column.name)
                .map(SqlValue::from),
        }
        .map_err(|e| map_db_error(table.name, e))?;
        row.set(column.name, value);
    }

    Ok(row)
}

#[async_trait]
impl StoreTx for PgTx {
    async fn select_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<Vec<Row>, StoreError> {
        let mut builder = SqlBuilder::new(format!("SELECT {} FROM {}", select_list(table), table.name));
        builder.push_where(table, query)?;
        builder.push_tail(table, query)?;

        let rows = builder
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(table.name, e))?;

        rows.iter().map(|r| decode_row(table, r)).collect()
    }

    async fn count_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<i64, StoreError> {
        let mut builder = SqlBuilder::new(format!("SELECT COUNT(*) AS n FROM {}", table.name));
        builder.push_where(table, query)?;

        let row = builder
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(table.name, e))?;

        row.try_get::<i64, _>("n")
            .map_err(|e| map_db_error(table.name, e))
    }

    async fn insert_row(
        &mut self,
        table: &'static TableSchema,
        row: Row,
    ) -> Result<i64, StoreError> {
        let mut builder = SqlBuilder::new(String::new());
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        for (column, value) in row.iter() {
            if column == "id" {
                continue;
            }
            let ty = table.column_type(column)?;
            columns.push(column);
            placeholders.push(builder.param(value.clone(), ty));
        }
        builder.sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
            table.name,
            columns.join(", "),
            placeholders.join(", ")
        );

        let inserted = builder
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(table.name, e))?;

        inserted
            .try_get::<i64, _>("id")
            .map_err(|e| map_db_error(table.name, e))
    }

    async fn update_row(
        &mut self,
        table: &'static TableSchema,
        id: i64,
        row: Row,
    ) -> Result<(), StoreError> {
        let mut builder = SqlBuilder::new(String::new());
        let mut assignments = Vec::new();
        for (column, value) in row.iter() {
            if column == "id" {
                continue;
            }
            let ty = table.column_type(column)?;
            let placeholder = builder.param(value.clone(), ty);
            assignments.push(format!("{} = {}", column, placeholder));
        }
        if assignments.is_empty() {
            return Ok(());
        }
        let id_placeholder = builder.param(SqlValue::Int(id), ColumnType::Int);
        builder.sql = format!(
            "UPDATE {} SET {} WHERE id = {}",
            table.name,
            assignments.join(", "),
            id_placeholder
        );

        let result = builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(table.name, e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                table: table.name,
                id,
            });
        }
        Ok(())
    }

    async fn delete_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<u64, StoreError> {
        let mut builder = SqlBuilder::new(format!("DELETE FROM {}", table.name));
        builder.push_where(table, query)?;

        let result = builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(table.name, e))?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Column, ForeignKey, OnDelete};

    static NOTES: TableSchema = TableSchema {
        name: "notes",
        columns: &[
            Column::new("title", ColumnType::Text),
            Column::nullable("owner_id", ColumnType::Int),
        ],
        unique: &[&["title"]],
        foreign_keys: &[ForeignKey {
            column: "owner_id",
            table: "users",
            target: "id",
            on_delete: OnDelete::Cascade,
        }],
    };

    #[test]
    fn test_where_clause_numbers_parameters() {
        let query = Query::new()
            .eq("title", "a")
            .gt("owner_id", 3i64)
            .is_in("id", vec![1i64, 2]);
        let mut builder = SqlBuilder::new("SELECT id FROM notes");
        builder.push_where(&NOTES, &query).unwrap();

        assert_eq!(
            builder.sql,
            "SELECT id FROM notes WHERE title = $1 AND owner_id > $2 AND id IN ($3, $4)"
        );
        assert_eq!(builder.params.len(), 4);
    }

    #[test]
    fn test_eq_null_becomes_is_null() {
        let query = Query::new().eq("owner_id", None::<i64>);
        let mut builder = SqlBuilder::new("SELECT id FROM notes");
        builder.push_where(&NOTES, &query).unwrap();

        assert_eq!(builder.sql, "SELECT id FROM notes WHERE owner_id IS NULL");
        assert!(builder.params.is_empty());
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let query = Query::new().eq("nope", 1i64);
        let mut builder = SqlBuilder::new("SELECT id FROM notes");
        assert!(matches!(
            builder.push_where(&NOTES, &query),
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_tail_with_lock() {
        let query = Query::new()
            .order_by("title", Direction::Desc)
            .limit(5)
            .offset(10)
            .for_update();
        let mut builder = SqlBuilder::new("SELECT id FROM notes");
        builder.push_tail(&NOTES, &query).unwrap();

        assert_eq!(
            builder.sql,
            "SELECT id FROM notes ORDER BY title DESC LIMIT 5 OFFSET 10 FOR UPDATE"
        );
    }
}
