use std::collections::BTreeSet;

use super::fields::{missing_required, normalize, EntityState, FieldKind, FieldSpec};
use super::User;
use crate::pipeline::RequestScope;
use crate::reconciler::group_members;
use crate::services::ServiceError;
use crate::store::{
    Column, ColumnType, Direction, ForeignKey, OnDelete, Query, Record, Row, StoreError,
    TableSchema, Tx,
};

pub static GROUPS: TableSchema = TableSchema {
    name: "groups",
    columns: &[
        Column::new("name", ColumnType::Text),
        Column::new("governor_id", ColumnType::Int),
    ],
    unique: &[&["name"]],
    foreign_keys: &[ForeignKey {
        column: "governor_id",
        table: "users",
        target: "id",
        on_delete: OnDelete::Restrict,
    }],
};

pub static GROUP_USERS: TableSchema = TableSchema {
    name: "group_users",
    columns: &[
        Column::new("group_id", ColumnType::Int),
        Column::new("user_id", ColumnType::Int),
    ],
    unique: &[&["group_id", "user_id"]],
    foreign_keys: &[
        ForeignKey {
            column: "group_id",
            table: "groups",
            target: "id",
            on_delete: OnDelete::Cascade,
        },
        ForeignKey {
            column: "user_id",
            table: "users",
            target: "id",
            on_delete: OnDelete::Cascade,
        },
    ],
};

pub const NAME: FieldSpec = FieldSpec::new("name", FieldKind::Text)
    .length(1, 256)
    .required();
pub const GOVERNOR: FieldSpec = FieldSpec::new("governor", FieldKind::Integer)
    .range(1, i64::MAX)
    .required();

#[derive(Debug, Clone)]
pub struct Group {
    id: i64,
    name: String,
    governor_id: i64,
    state: EntityState,
}

/// One `(group, user)` membership row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub id: i64,
    pub group_id: i64,
    pub user_id: i64,
}

impl Group {
    pub fn new(name: &str, governor_id: i64) -> Result<Self, ServiceError> {
        let name = name.trim();
        NAME.check_text(name)?;
        GOVERNOR.check_int(governor_id)?;
        Ok(Self {
            id: 0,
            name: name.to_string(),
            governor_id,
            state: EntityState::Creating,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn governor_id(&self) -> i64 {
        self.governor_id
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), ServiceError> {
        let name = normalize(Some(name.to_string())).unwrap_or_default();
        NAME.check_text(&name)?;
        self.name = name;
        self.state = self.state.touched();
        Ok(())
    }

    /// The new governor becomes a member on the next `update`.
    pub fn set_governor(&mut self, user_id: i64) -> Result<(), ServiceError> {
        GOVERNOR.check_int(user_id)?;
        self.governor_id = user_id;
        self.state = self.state.touched();
        Ok(())
    }

    /// Inserts the group and its governor's membership.
    pub async fn create(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        if self.state != EntityState::Creating {
            return Err(ServiceError::OperationNotPermitted(
                "group already exists".to_string(),
            ));
        }
        let missing = missing_required(&[(&NAME, !self.name.is_empty()), (&GOVERNOR, self.governor_id > 0)]);
        if !missing.is_empty() {
            return Err(ServiceError::FieldRequired(missing));
        }
        User::get(&mut scope.tx, self.governor_id).await?;

        scope.tx.insert(self).await?;
        self.insert_member(&mut scope.tx, self.governor_id).await?;
        scope.projector.sync_user_groups(&mut scope.tx, self.governor_id).await?;
        self.state = EntityState::Saved;

        tracing::info!(group_id = self.id, name = %self.name, "Group created");
        Ok(())
    }

    pub async fn update(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        self.ensure_persisted()?;
        let previous = scope.tx.get::<Group>(self.id).await?;
        if previous.governor_id != self.governor_id {
            User::get(&mut scope.tx, self.governor_id).await?;
        }
        scope.tx.update(self).await?;

        if !self.is_member(&mut scope.tx, self.governor_id).await? {
            self.insert_member(&mut scope.tx, self.governor_id).await?;
            scope.forget_access();
            scope.projector.sync_user_groups(&mut scope.tx, self.governor_id).await?;
        }
        self.state = EntityState::Saved;

        tracing::info!(group_id = self.id, "Group updated");
        Ok(())
    }

    /// Fails with `EntityConstraintFailed` while the group is the root group
    /// of a project.
    pub async fn delete(&mut self, scope: &mut RequestScope) -> Result<(), ServiceError> {
        self.ensure_persisted()?;
        let members = group_members(&mut scope.tx, &[self.id]).await?;

        scope.tx.delete::<Group>(self.id).await?;
        scope.forget_access();
        scope.projector.sync_users(&mut scope.tx, &members).await?;
        self.state = EntityState::Deleted;

        tracing::info!(group_id = self.id, name = %self.name, "Group deleted");
        Ok(())
    }

    async fn insert_member(&self, tx: &mut Tx, user_id: i64) -> Result<(), ServiceError> {
        let mut member = GroupMember {
            id: 0,
            group_id: self.id,
            user_id,
        };
        tx.insert(&mut member).await?;
        Ok(())
    }

    pub async fn add_member(&self, scope: &mut RequestScope, user_id: i64) -> Result<(), ServiceError> {
        self.ensure_persisted()?;
        User::get(&mut scope.tx, user_id).await?;
        if self.is_member(&mut scope.tx, user_id).await? {
            return Err(ServiceError::EntityDuplicated(format!(
                "user {} is already a member of group {}",
                user_id, self.name
            )));
        }
        self.insert_member(&mut scope.tx, user_id).await?;
        scope.forget_access();
        scope.projector.sync_user_groups(&mut scope.tx, user_id).await?;

        tracing::info!(group_id = self.id, user_id, "Group member added");
        Ok(())
    }

    /// The governor cannot be removed.
    pub async fn remove_member(&self, scope: &mut RequestScope, user_id: i64) -> Result<(), ServiceError> {
        self.ensure_persisted()?;
        if user_id == self.governor_id {
            return Err(ServiceError::OperationNotPermitted(
                "the governor cannot leave the group".to_string(),
            ));
        }
        let removed = scope
            .tx
            .delete_where::<GroupMember>(
                Query::new().eq("group_id", self.id).eq("user_id", user_id),
            )
            .await?;
        if removed == 0 {
            return Err(ServiceError::not_found(format!(
                "Member {} of group {}",
                user_id, self.id
            )));
        }
        scope.forget_access();
        scope.projector.sync_user_groups(&mut scope.tx, user_id).await?;

        tracing::info!(group_id = self.id, user_id, "Group member removed");
        Ok(())
    }

    pub async fn member_ids(&self, tx: &mut Tx) -> Result<BTreeSet<i64>, ServiceError> {
        group_members(tx, &[self.id]).await
    }

    pub async fn members(&self, tx: &mut Tx) -> Result<Vec<User>, ServiceError> {
        let ids = self.member_ids(tx).await?;
        Ok(tx
            .list::<User>(
                Query::new()
                    .is_in("id", ids)
                    .order_by("login", Direction::Asc),
            )
            .await?)
    }

    pub async fn is_member(&self, tx: &mut Tx, user_id: i64) -> Result<bool, ServiceError> {
        let count = tx
            .count::<GroupMember>(Query::new().eq("group_id", self.id).eq("user_id", user_id))
            .await?;
        Ok(count > 0)
    }

    fn ensure_persisted(&self) -> Result<(), ServiceError> {
        match self.state {
            EntityState::Creating | EntityState::Deleted => Err(
                ServiceError::OperationNotPermitted("group is not stored".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub async fn get(tx: &mut Tx, id: i64) -> Result<Group, ServiceError> {
        tx.find::<Group>(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Group {}", id)))
    }

    pub async fn list(tx: &mut Tx) -> Result<Vec<Group>, ServiceError> {
        Ok(tx
            .list::<Group>(Query::new().order_by("name", Direction::Asc))
            .await?)
    }

    /// Ids of the groups a user belongs to.
    pub async fn ids_of_user(tx: &mut Tx, user_id: i64) -> Result<Vec<i64>, ServiceError> {
        Ok(tx
            .list::<GroupMember>(Query::new().eq("user_id", user_id))
            .await?
            .into_iter()
            .map(|m| m.group_id)
            .collect())
    }
}

impl Record for Group {
    const TABLE: &'static TableSchema = &GROUPS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("name", &self.name)
            .with("governor_id", self.governor_id)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            name: row.text("name")?,
            governor_id: row.int("governor_id")?,
            state: EntityState::Loaded,
        })
    }
}

impl Record for GroupMember {
    const TABLE: &'static TableSchema = &GROUP_USERS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("group_id", self.group_id)
            .with("user_id", self.user_id)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            group_id: row.int("group_id")?,
            user_id: row.int("user_id")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(Group::new("Microscopy", 1).is_ok());
        assert!(Group::new("   ", 1).is_err());
        assert!(Group::new(&"g".repeat(257), 1).is_err());
        assert!(Group::new("ok", 0).is_err());
    }

    #[test]
    fn test_setters_touch_loaded_group() {
        let row = Group::new("lab", 2).unwrap().to_row().with("id", 5);
        let mut group = Group::from_row(&row).unwrap();
        assert_eq!(group.state(), EntityState::Loaded);

        group.set_name("lab-2").unwrap();
        assert_eq!(group.state(), EntityState::Changed);
        assert_eq!(group.name(), "lab-2");
    }
}
