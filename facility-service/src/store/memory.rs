use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    Condition, Direction, OnDelete, Query, Row, SqlValue, Store, StoreError, StoreTx,
    TableSchema, Tx,
};

type TableRows = BTreeMap<i64, Row>;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<&'static str, TableRows>,
}

impl Tables {
    fn table(&self, name: &str) -> Option<&TableRows> {
        self.rows.get(name)
    }

    fn table_mut(&mut self, name: &'static str) -> &mut TableRows {
        self.rows.entry(name).or_default()
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    next_id: HashMap<&'static str, i64>,
}

#[derive(Debug, Clone)]
enum Change {
    Insert(&'static TableSchema, i64, Row),
    Update(&'static TableSchema, i64, Row),
    Delete(&'static TableSchema, i64),
}

/// In-process backend.
///
/// A transaction works on a snapshot taken at `begin` and records its changes;
/// `commit` replays them onto the shared state, re-checking unique keys
/// against whatever other transactions committed in between. Row locks are
/// not modelled.
#[derive(Clone)]
pub struct MemoryStore {
    schemas: &'static [&'static TableSchema],
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new(schemas: &'static [&'static TableSchema]) -> Self {
        Self {
            schemas,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Number of committed rows in a table.
    pub fn committed_rows(&self, table: &str) -> usize {
        self.shared
            .lock()
            .map(|s| s.tables.table(table).map(|t| t.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>, StoreError> {
    shared
        .lock()
        .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Tx, StoreError> {
        let working = lock(&self.shared)?.tables.clone();
        Ok(Tx::new(Box::new(MemoryTx {
            schemas: self.schemas,
            shared: Arc::clone(&self.shared),
            working,
            log: Vec::new(),
        })))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        lock(&self.shared).map(|_| ())
    }
}

struct MemoryTx {
    schemas: &'static [&'static TableSchema],
    shared: Arc<Mutex<Shared>>,
    working: Tables,
    log: Vec<Change>,
}

fn satisfies(table: &TableSchema, row: &Row, condition: &Condition) -> Result<bool, StoreError> {
    table.column_type(condition.column())?;
    let value = row.get(condition.column());
    Ok(match condition {
        Condition::Eq(_, v) => value == v,
        Condition::Ne(_, v) => value != v,
        Condition::Lt(_, v) => !value.is_null() && value.compare(v) == Ordering::Less,
        Condition::Gt(_, v) => !value.is_null() && value.compare(v) == Ordering::Greater,
        Condition::In(_, values) => values.iter().any(|v| v == value),
        Condition::IsNull(_) => value.is_null(),
    })
}

fn filter<'a>(
    table: &TableSchema,
    rows: Option<&'a TableRows>,
    query: &Query,
) -> Result<Vec<&'a Row>, StoreError> {
    let mut selected = Vec::new();
    for row in rows.into_iter().flat_map(|t| t.values()) {
        let mut keep = true;
        for condition in &query.conditions {
            if !satisfies(table, row, condition)? {
                keep = false;
                break;
            }
        }
        if keep {
            selected.push(row);
        }
    }
    Ok(selected)
}

fn check_not_null(table: &TableSchema, row: &Row) -> Result<(), StoreError> {
    for column in table.columns.iter().filter(|c| !c.nullable) {
        if row.get(column.name).is_null() {
            return Err(StoreError::Constraint {
                table: table.name,
                detail: format!("null value in column {}", column.name),
            });
        }
    }
    for (name, _) in row.iter() {
        table.column_type(name)?;
    }
    Ok(())
}

fn check_unique(tables: &Tables, table: &TableSchema, id: i64, row: &Row) -> Result<(), StoreError> {
    let Some(existing) = tables.table(table.name) else {
        return Ok(());
    };
    for key in table.unique {
        if key.iter().any(|c| row.get(c).is_null()) {
            continue;
        }
        let clash = existing
            .iter()
            .any(|(other_id, other)| *other_id != id && key.iter().all(|c| other.get(c) == row.get(c)));
        if clash {
            return Err(StoreError::Duplicate {
                table: table.name,
                detail: format!("{}_{}_key", table.name, key.join("_")),
            });
        }
    }
    Ok(())
}

fn check_references(tables: &Tables, table: &TableSchema, row: &Row) -> Result<(), StoreError> {
    for fk in table.foreign_keys {
        let value = row.get(fk.column);
        if value.is_null() {
            continue;
        }
        let found = tables.table(fk.table).is_some_and(|target| {
            if fk.target == "id" {
                matches!(value, SqlValue::Int(id) if target.contains_key(id))
            } else {
                target.values().any(|r| r.get(fk.target) == value)
            }
        });
        if !found {
            return Err(StoreError::Constraint {
                table: table.name,
                detail: format!("{}_{}_fkey", table.name, fk.column),
            });
        }
    }
    Ok(())
}

/// Deletes one row and applies the ON DELETE rule of every foreign key
/// pointing at it.
fn delete_cascading(
    schemas: &[&'static TableSchema],
    tables: &mut Tables,
    table: &'static TableSchema,
    id: i64,
    log: &mut Vec<Change>,
) -> Result<(), StoreError> {
    let Some(row) = tables.table_mut(table.name).remove(&id) else {
        return Ok(());
    };
    log.push(Change::Delete(table, id));

    for &referencing in schemas {
        for fk in referencing.foreign_keys.iter().filter(|fk| fk.table == table.name) {
            let target_value = if fk.target == "id" {
                SqlValue::Int(id)
            } else {
                row.get(fk.target).clone()
            };
            let dependents: Vec<i64> = tables
                .table(referencing.name)
                .map(|rows| {
                    rows.iter()
                        .filter(|(_, r)| r.get(fk.column) == &target_value)
                        .map(|(dep_id, _)| *dep_id)
                        .collect()
                })
                .unwrap_or_default();
            if dependents.is_empty() {
                continue;
            }

            match fk.on_delete {
                OnDelete::Restrict => {
                    return Err(StoreError::Constraint {
                        table: referencing.name,
                        detail: format!(
                            "{} still referenced from {}.{}",
                            table.name, referencing.name, fk.column
                        ),
                    });
                }
                OnDelete::Cascade => {
                    for dep_id in dependents {
                        delete_cascading(schemas, tables, referencing, dep_id, log)?;
                    }
                }
                OnDelete::SetNull => {
                    let rows = tables.table_mut(referencing.name);
                    for dep_id in dependents {
                        if let Some(dep) = rows.get_mut(&dep_id) {
                            dep.set(fk.column, SqlValue::Null);
                            log.push(Change::Update(referencing, dep_id, dep.clone()));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn sort(rows: &mut [&Row], order: &[(&'static str, Direction)]) {
    rows.sort_by(|a, b| {
        for (column, direction) in order {
            let ord = a.get(column).compare(b.get(column));
            let ord = match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.get("id").compare(b.get("id"))
    });
}

fn window<T>(rows: Vec<T>, query: &Query) -> Vec<T> {
    let offset = query.offset.unwrap_or(0).max(0) as usize;
    let limit = query.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn select_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<Vec<Row>, StoreError> {
        let mut rows = filter(table, self.working.table(table.name), query)?;
        for (column, _) in &query.order {
            table.column_type(column)?;
        }
        sort(&mut rows, &query.order);
        Ok(window(rows, query).into_iter().cloned().collect())
    }

    async fn count_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<i64, StoreError> {
        let rows = filter(table, self.working.table(table.name), query)?;
        Ok(rows.len() as i64)
    }

    async fn insert_row(
        &mut self,
        table: &'static TableSchema,
        mut row: Row,
    ) -> Result<i64, StoreError> {
        row.remove("id");
        check_not_null(table, &row)?;
        check_unique(&self.working, table, 0, &row)?;
        check_references(&self.working, table, &row)?;

        let id = {
            let mut shared = lock(&self.shared)?;
            let next = shared.next_id.entry(table.name).or_insert(0);
            *next += 1;
            *next
        };
        row.set("id", id);

        self.working.table_mut(table.name).insert(id, row.clone());
        self.log.push(Change::Insert(table, id, row));
        Ok(id)
    }

    async fn update_row(
        &mut self,
        table: &'static TableSchema,
        id: i64,
        row: Row,
    ) -> Result<(), StoreError> {
        let mut merged = self
            .working
            .table(table.name)
            .and_then(|t| t.get(&id))
            .cloned()
            .ok_or(StoreError::NotFound {
                table: table.name,
                id,
            })?;
        for (column, value) in row.iter() {
            if column != "id" {
                merged.set(column, value.clone());
            }
        }
        check_not_null(table, &merged)?;
        check_unique(&self.working, table, id, &merged)?;
        check_references(&self.working, table, &merged)?;

        self.working.table_mut(table.name).insert(id, merged.clone());
        self.log.push(Change::Update(table, id, merged));
        Ok(())
    }

    async fn delete_rows(
        &mut self,
        table: &'static TableSchema,
        query: &Query,
    ) -> Result<u64, StoreError> {
        let ids: Vec<i64> = filter(table, self.working.table(table.name), query)?
            .into_iter()
            .map(|r| r.id())
            .collect::<Result<_, _>>()?;

        // Restrict violations must leave the working copy untouched.
        let mut scratch = self.working.clone();
        let mut changes = Vec::new();
        for id in &ids {
            delete_cascading(self.schemas, &mut scratch, table, *id, &mut changes)?;
        }
        self.working = scratch;
        self.log.extend(changes);
        Ok(ids.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            shared, log, ..
        } = *self;
        let mut shared = lock(&shared)?;
        let mut next = shared.tables.clone();

        for change in log {
            match change {
                Change::Insert(table, id, row) => {
                    check_unique(&next, table, id, &row)?;
                    next.table_mut(table.name).insert(id, row);
                }
                Change::Update(table, id, row) => {
                    if next.table(table.name).is_some_and(|t| t.contains_key(&id)) {
                        check_unique(&next, table, id, &row)?;
                        next.table_mut(table.name).insert(id, row);
                    }
                }
                Change::Delete(table, id) => {
                    next.table_mut(table.name).remove(&id);
                }
            }
        }

        shared.tables = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Column, ColumnType, ForeignKey};

    static OWNERS: TableSchema = TableSchema {
        name: "owners",
        columns: &[Column::new("name", ColumnType::Text)],
        unique: &[&["name"]],
        foreign_keys: &[],
    };

    static PETS: TableSchema = TableSchema {
        name: "pets",
        columns: &[
            Column::new("owner_id", ColumnType::Int),
            Column::new("name", ColumnType::Text),
        ],
        unique: &[&["owner_id", "name"]],
        foreign_keys: &[ForeignKey {
            column: "owner_id",
            table: "owners",
            target: "id",
            on_delete: OnDelete::Cascade,
        }],
    };

    static HOUSES: TableSchema = TableSchema {
        name: "houses",
        columns: &[Column::new("owner_id", ColumnType::Int)],
        unique: &[],
        foreign_keys: &[ForeignKey {
            column: "owner_id",
            table: "owners",
            target: "id",
            on_delete: OnDelete::Restrict,
        }],
    };

    static SCHEMAS: &[&TableSchema] = &[&OWNERS, &PETS, &HOUSES];

    async fn owner(tx: &mut Tx, name: &str) -> i64 {
        tx.inner
            .insert_row(&OWNERS, Row::new().with("name", name))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_makes_rows_visible() {
        let store = MemoryStore::new(SCHEMAS);
        let mut tx = store.begin().await.unwrap();
        owner(&mut tx, "ada").await;

        assert_eq!(store.committed_rows("owners"), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.committed_rows("owners"), 1);
    }

    #[tokio::test]
    async fn test_drop_discards_changes() {
        let store = MemoryStore::new(SCHEMAS);
        {
            let mut tx = store.begin().await.unwrap();
            owner(&mut tx, "ada").await;
        }
        assert_eq!(store.committed_rows("owners"), 0);
    }

    #[tokio::test]
    async fn test_unique_violation() {
        let store = MemoryStore::new(SCHEMAS);
        let mut tx = store.begin().await.unwrap();
        owner(&mut tx, "ada").await;
        let err = tx
            .inner
            .insert_row(&OWNERS, Row::new().with("name", "ada"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_cascade_and_restrict() {
        let store = MemoryStore::new(SCHEMAS);
        let mut tx = store.begin().await.unwrap();
        let ada = owner(&mut tx, "ada").await;
        let bob = owner(&mut tx, "bob").await;
        tx.inner
            .insert_row(&PETS, Row::new().with("owner_id", ada).with("name", "rex"))
            .await
            .unwrap();
        tx.inner
            .insert_row(&HOUSES, Row::new().with("owner_id", bob))
            .await
            .unwrap();

        let deleted = tx
            .inner
            .delete_rows(&OWNERS, &Query::new().eq("id", ada))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(tx.inner.count_rows(&PETS, &Query::new()).await.unwrap(), 0);

        let err = tx
            .inner
            .delete_rows(&OWNERS, &Query::new().eq("id", bob))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { .. }));
        assert_eq!(tx.inner.count_rows(&OWNERS, &Query::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_is_rejected() {
        let store = MemoryStore::new(SCHEMAS);
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .inner
            .insert_row(&PETS, Row::new().with("owner_id", 99i64).with("name", "rex"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { .. }));
    }

    #[tokio::test]
    async fn test_order_limit_offset() {
        let store = MemoryStore::new(SCHEMAS);
        let mut tx = store.begin().await.unwrap();
        for name in ["carol", "ada", "bob"] {
            owner(&mut tx, name).await;
        }
        let rows = tx
            .inner
            .select_rows(
                &OWNERS,
                &Query::new()
                    .order_by("name", Direction::Asc)
                    .offset(1)
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("name").unwrap(), "bob");
    }
}
