//! Static table descriptions shared by both backends.
//!
//! Every table has an implicit `id BIGSERIAL PRIMARY KEY` column which is not
//! listed in [`TableSchema::columns`].

use super::{Row, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Bool,
    Text,
    Time,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    pub const fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Restrict,
    Cascade,
    SetNull,
}

impl OnDelete {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub column: &'static str,
    pub table: &'static str,
    /// Referenced column, `id` unless the target has another unique key.
    pub target: &'static str,
    pub on_delete: OnDelete,
}

#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub unique: &'static [&'static [&'static str]],
    pub foreign_keys: &'static [ForeignKey],
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Type of a column, `id` included.
    pub fn column_type(&self, name: &str) -> Result<ColumnType, StoreError> {
        if name == "id" {
            return Ok(ColumnType::Int);
        }
        self.column(name)
            .map(|c| c.ty)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name,
                column: name.to_string(),
            })
    }
}

/// A value type persisted as one row of one table.
pub trait Record: Sized + Send + Sync {
    const TABLE: &'static TableSchema;

    /// Primary key, `0` until the record has been inserted.
    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    /// All columns except `id`.
    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self, StoreError>;
}
