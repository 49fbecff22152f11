use super::fields::{missing_required, normalize, EntityState, FieldKind, FieldSpec};
use super::{Group, Permission};
use crate::pipeline::RequestScope;
use crate::reconciler::project_users;
use crate::services::ServiceError;
use crate::store::{
    Column, ColumnType, Direction, ForeignKey, OnDelete, Query, Record, Row, StoreError,
    TableSchema, Tx,
};

pub static PROJECTS: TableSchema = TableSchema {
    name: "projects",
    columns: &[
        Column::new("alias", ColumnType::Text),
        Column::new("name", ColumnType::Text),
        Column::nullable("description", ColumnType::Text),
        Column::nullable("avatar", ColumnType::Text),
        Column::new("root_group_id", ColumnType::Int),
        Column::nullable("project_dir", ColumnType::Text),
        Column::nullable("unix_group", ColumnType::Text),
    ],
    unique: &[&["alias"], &["name"], &["project_dir"], &["unix_group"]],
    foreign_keys: &[ForeignKey {
        column: "root_group_id",
        table: "groups",
        target: "id",
        on_delete: OnDelete::Restrict,
    }],
};

pub const ALIAS: FieldSpec = FieldSpec::new("alias", FieldKind::Slug)
    .length(1, 64)
    .required();
pub const NAME: FieldSpec = FieldSpec::new("name", FieldKind::Text)
    .length(1, 64)
    .required();
pub const DESCRIPTION: FieldSpec = FieldSpec::new("description", FieldKind::Text).length(1, 1024);
pub const AVATAR: FieldSpec = FieldSpec::new("avatar", FieldKind::Text).length(1, 256);
pub const ROOT_GROUP: FieldSpec = FieldSpec::new("root_group", FieldKind::Integer)
    .range(1, i64::MAX)
    .required();
pub const PROJECT_DIR: FieldSpec = FieldSpec::new("project_dir", FieldKind::Text).read_only();
pub const UNIX_GROUP: FieldSpec = FieldSpec::new("unix_group", FieldKind::Text).read_only();

#[derive(Debug, Clone)]
pub struct Project {
    id: i64,
    alias: String,
    name: String,
    description: Option<String>,
    avatar: Option<String>,
    root_group_id: i64,
    project_dir: Option<String>,
    unix_group: Option<String>,
    state: EntityState,
}

impl Project {
    pub fn new(alias: &str, name: &str, root_group_id: i64) -> Result<Self, ServiceError> {
        ALIAS.check_text(alias)?;
        NAME.check_text(name.trim())?;
        ROOT_GROUP.check_int(root_group_id)?;
        Ok(Self {
            id: 0,
            alias: alias.to_string(),
            name: name.trim().to_string(),
            description: None,
            avatar: None,
            root_group_id,
            project_dir: None,
            unix_group: None,
            state: EntityState::Creating,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn avatar(&self) -> Option<&str> {
        self.avatar.as_deref()
    }

    pub fn root_group_id(&self) -> i64 {
        self.root_group_id
    }

    pub fn project_dir(&self) -> Option<&str> {
        self.project_dir.as_deref()
    }

    pub fn unix_group(&self) -> Option<&str> {
        self.unix_group.as_deref()
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    fn touch(&mut self) {
        self.state = self.state.touched();
    }

    pub fn set_alias(&mut self, alias: &str) -> Result<(), ServiceError> {
        ALIAS.check_text(alias)?;
        self.alias = alias.to_string();
        self.touch();
        Ok(())
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), ServiceError> {
        let name = name.trim();
        NAME.check_text(name)?;
        self.name = name.to_string();
        self.touch();
        Ok(())
    }

    pub fn set_description(&mut self, description: Option<String>) -> Result<(), ServiceError> {
        let description = normalize(description);
        DESCRIPTION.check_opt_text(description.as_deref())?;
        self.description = description;
        self.touch();
        Ok(())
    }

    pub fn set_avatar(&mut self, avatar: Option<String>) -> Result<(), ServiceError> {
        let avatar = normalize(avatar);
        AVATAR.check_opt_text(avatar.as_deref())?;
        self.avatar = avatar;
        self.touch();
        Ok(())
    }

    pub fn set_root_group(&mut self, group_id: i64) -> Result<(), ServiceError> {
        ROOT_GROUP.check_int(group_id)?;
        self.root_group_id = group_id;
        self.touch();
        Ok(())
    }

    pub fn set_project_dir(&mut self, _value: Option<String>) -> Result<(), ServiceError> {
        PROJECT_DIR.check_writable()
    }

    pub fn set_unix_group(&mut self, _value: Option<String>) -> Result<(), ServiceError> {
        UNIX_GROUP.check_writable()
    }

    pub(crate) fn assign_posix(&mut self, unix_group: Option<String>, project_dir: Option<String>) {
        self.unix_group = unix_group;
        self.project_dir = project_dir;
        self.touch();
    }

    pub async fn create(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        if self.state != EntityState::Creating {
            return Err(ServiceError::OperationNotPermitted(
                "project already exists".to_string(),
            ));
        }
        let missing = missing_required(&[
            (&ALIAS, !self.alias.is_empty()),
            (&NAME, !self.name.is_empty()),
            (&ROOT_GROUP, self.root_group_id > 0),
        ]);
        if !missing.is_empty() {
            return Err(ServiceError::FieldRequired(missing));
        }
        Group::get(&mut scope.tx, self.root_group_id).await?;

        scope.projector.assign_project_names(self);
        scope.tx.insert(self).await?;
        scope.projector.project_created(&mut scope.tx, self).await?;
        self.state = EntityState::Saved;

        tracing::info!(project_id = self.id, alias = %self.alias, "Project created");
        Ok(())
    }

    pub async fn update(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        self.ensure_persisted()?;
        let previous = scope.tx.get::<Project>(self.id).await?;
        let old_root = previous.root_group_id;
        if old_root != self.root_group_id {
            Group::get(&mut scope.tx, self.root_group_id).await?;
        }

        if previous.alias != self.alias {
            scope.projector.project_renamed(&previous, self).await?;
        }
        scope.tx.update(self).await?;

        if old_root != self.root_group_id {
            // The root group's grant is implicit; a stored one would shadow it.
            let dropped = scope
                .tx
                .delete_where::<Permission>(
                    Query::new()
                        .eq("project_id", self.id)
                        .eq("group_id", self.root_group_id),
                )
                .await?;
            if dropped > 0 {
                tracing::info!(project_id = self.id, group_id = self.root_group_id, "Permission of new root group dropped");
            }
            scope.forget_access();
            let mut affected = crate::reconciler::group_members(&mut scope.tx, &[old_root]).await?;
            affected.extend(project_users(&mut scope.tx, self.id).await?);
            scope.projector.sync_users(&mut scope.tx, &affected).await?;
        }
        self.state = EntityState::Saved;

        tracing::info!(project_id = self.id, "Project updated");
        Ok(())
    }

    /// Permissions go with the project; the host group and directory are
    /// removed and affected users lose the group.
    pub async fn delete(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        self.ensure_persisted()?;
        let affected = project_users(&mut scope.tx, self.id).await?;

        scope.tx.delete::<Project>(self.id).await?;
        scope.forget_access();
        scope.projector.project_deleted(self).await?;
        scope.projector.sync_users(&mut scope.tx, &affected).await?;
        self.state = EntityState::Deleted;

        tracing::info!(project_id = self.id, alias = %self.alias, "Project deleted");
        Ok(())
    }

    fn ensure_persisted(&self) -> Result<(), ServiceError> {
        match self.state {
            EntityState::Creating | EntityState::Deleted => Err(
                ServiceError::OperationNotPermitted("project is not stored".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Looks the key up as an alias first, then as a numeric id.
    pub async fn find_by_alias_or_id(tx: &mut Tx, key: &str) -> Result<Option<Project>, ServiceError> {
        if let Some(project) = tx.find_by::<Project>("alias", key).await? {
            return Ok(Some(project));
        }
        match key.parse::<i64>() {
            Ok(id) => Ok(tx.find::<Project>(id).await?),
            Err(_) => Ok(None),
        }
    }

    pub async fn get(tx: &mut Tx, id: i64) -> Result<Project, ServiceError> {
        tx.find::<Project>(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Project {}", id)))
    }

    pub async fn list(tx: &mut Tx) -> Result<Vec<Project>, ServiceError> {
        Ok(tx
            .list::<Project>(Query::new().order_by("alias", Direction::Asc))
            .await?)
    }
}

impl Record for Project {
    const TABLE: &'static TableSchema = &PROJECTS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("alias", &self.alias)
            .with("name", &self.name)
            .with("description", self.description.clone())
            .with("avatar", self.avatar.clone())
            .with("root_group_id", self.root_group_id)
            .with("project_dir", self.project_dir.clone())
            .with("unix_group", self.unix_group.clone())
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            alias: row.text("alias")?,
            name: row.text("name")?,
            description: row.opt_text("description")?,
            avatar: row.opt_text("avatar")?,
            root_group_id: row.int("root_group_id")?,
            project_dir: row.opt_text("project_dir")?,
            unix_group: row.opt_text("unix_group")?,
            state: EntityState::Loaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(Project::new("prj-1", "Project One", 1).is_ok());
        assert!(Project::new("prj 1", "Project One", 1).is_err());
        assert!(Project::new(&"p".repeat(65), "P", 1).is_err());
        assert!(Project::new("p", "", 1).is_err());
    }

    #[test]
    fn test_description_limit() {
        let mut project = Project::new("p", "P", 1).unwrap();
        assert!(project.set_description(Some("d".repeat(1025))).is_err());
        project.set_description(Some("  ".to_string())).unwrap();
        assert_eq!(project.description(), None);
    }

    #[test]
    fn test_reconciler_fields_are_read_only() {
        let mut project = Project::new("p", "P", 1).unwrap();
        assert!(project.set_project_dir(Some("/srv".to_string())).is_err());
        assert!(project.set_unix_group(Some("p".to_string())).is_err());
    }
}
