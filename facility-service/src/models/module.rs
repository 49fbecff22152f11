use serde::Serialize;

use super::fields::{EntityState, FieldKind, FieldSpec};
use crate::services::ServiceError;
use crate::store::{
    Column, ColumnType, Direction, Query, Record, Row, StoreError, TableSchema, Tx,
};

pub static MODULES: TableSchema = TableSchema {
    name: "modules",
    columns: &[
        Column::new("alias", ColumnType::Text),
        Column::new("entry_point", ColumnType::Text),
        Column::new("position", ColumnType::Int),
        Column::new("is_enabled", ColumnType::Bool),
        Column::new("is_application", ColumnType::Bool),
        Column::new("user_settings", ColumnType::Json),
    ],
    unique: &[&["alias"]],
    foreign_keys: &[],
};

/// Entry point of the authorization modules.
pub const AUTHORIZATIONS: &str = "authorizations";

pub const ALIAS: FieldSpec = FieldSpec::new("alias", FieldKind::Slug).length(1, 64);
pub const POSITION: FieldSpec = FieldSpec::new("position", FieldKind::Integer).range(0, 10_000);

/// Installed module, enabled or not, with its settings snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDescriptor {
    id: i64,
    alias: String,
    entry_point: String,
    position: i64,
    is_enabled: bool,
    is_application: bool,
    user_settings: serde_json::Value,
    #[serde(skip)]
    state: EntityState,
}

impl ModuleDescriptor {
    pub fn new(alias: &str, entry_point: &str, position: i64) -> Result<Self, ServiceError> {
        ALIAS.check_text(alias)?;
        POSITION.check_int(position)?;
        Ok(Self {
            id: 0,
            alias: alias.to_string(),
            entry_point: entry_point.to_string(),
            position,
            is_enabled: false,
            is_application: false,
            user_settings: serde_json::Value::Object(Default::default()),
            state: EntityState::Creating,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn is_application(&self) -> bool {
        self.is_application
    }

    pub fn user_settings(&self) -> &serde_json::Value {
        &self.user_settings
    }

    /// String setting, `None` when absent or not a string.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.user_settings.get(key).and_then(|v| v.as_str())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.is_enabled = enabled;
        self.state = self.state.touched();
    }

    pub fn set_application(&mut self, application: bool) {
        self.is_application = application;
        self.state = self.state.touched();
    }

    pub fn set_position(&mut self, position: i64) -> Result<(), ServiceError> {
        POSITION.check_int(position)?;
        self.position = position;
        self.state = self.state.touched();
        Ok(())
    }

    pub fn set_user_settings(&mut self, settings: serde_json::Value) -> Result<(), ServiceError> {
        if !settings.is_object() {
            return Err(ServiceError::invalid("user_settings", "must be a JSON object"));
        }
        self.user_settings = settings;
        self.state = self.state.touched();
        Ok(())
    }

    pub async fn create(&mut self, tx: &mut Tx) -> Result<(), ServiceError> {
        tx.insert(self).await?;
        self.state = EntityState::Saved;
        Ok(())
    }

    pub async fn update(&mut self, tx: &mut Tx) -> Result<(), ServiceError> {
        tx.update(self).await?;
        self.state = EntityState::Saved;
        tracing::info!(alias = %self.alias, enabled = self.is_enabled, "Module updated");
        Ok(())
    }

    pub async fn find_by_alias(tx: &mut Tx, alias: &str) -> Result<Option<ModuleDescriptor>, ServiceError> {
        Ok(tx.find_by::<ModuleDescriptor>("alias", alias).await?)
    }

    /// All modules of an entry point ordered by position.
    pub async fn list(tx: &mut Tx, entry_point: &str) -> Result<Vec<ModuleDescriptor>, ServiceError> {
        Ok(tx
            .list::<ModuleDescriptor>(
                Query::new()
                    .eq("entry_point", entry_point)
                    .order_by("position", Direction::Asc),
            )
            .await?)
    }

    pub async fn list_enabled(tx: &mut Tx, entry_point: &str) -> Result<Vec<ModuleDescriptor>, ServiceError> {
        Ok(tx
            .list::<ModuleDescriptor>(
                Query::new()
                    .eq("entry_point", entry_point)
                    .eq("is_enabled", true)
                    .order_by("position", Direction::Asc),
            )
            .await?)
    }
}

impl Record for ModuleDescriptor {
    const TABLE: &'static TableSchema = &MODULES;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("alias", &self.alias)
            .with("entry_point", &self.entry_point)
            .with("position", self.position)
            .with("is_enabled", self.is_enabled)
            .with("is_application", self.is_application)
            .with("user_settings", self.user_settings.clone())
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            alias: row.text("alias")?,
            entry_point: row.text("entry_point")?,
            position: row.int("position")?,
            is_enabled: row.bool("is_enabled")?,
            is_application: row.bool("is_application")?,
            user_settings: row.json("user_settings")?,
            state: EntityState::Loaded,
        })
    }
}
