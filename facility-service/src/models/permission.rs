use serde::Serialize;

use super::{AccessLevel, Group, Project};
use crate::pipeline::RequestScope;
use crate::services::ServiceError;
use crate::store::{
    Column, ColumnType, Direction, ForeignKey, OnDelete, Query, Record, Row, StoreError,
    TableSchema, Tx,
};

pub static PERMISSIONS: TableSchema = TableSchema {
    name: "permissions",
    columns: &[
        Column::new("project_id", ColumnType::Int),
        Column::new("group_id", ColumnType::Int),
        Column::new("access_level", ColumnType::Text),
    ],
    unique: &[&["project_id", "group_id"]],
    foreign_keys: &[
        ForeignKey {
            column: "project_id",
            table: "projects",
            target: "id",
            on_delete: OnDelete::Cascade,
        },
        ForeignKey {
            column: "group_id",
            table: "groups",
            target: "id",
            on_delete: OnDelete::Cascade,
        },
        ForeignKey {
            column: "access_level",
            table: "access_levels",
            target: "alias",
            on_delete: OnDelete::Restrict,
        },
    ],
};

/// Grant of one access level on one project to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
    id: i64,
    project_id: i64,
    group_id: i64,
    level: AccessLevel,
}

impl Permission {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn level(&self) -> AccessLevel {
        self.level
    }

    /// Grants or changes the level of `group_id` on `project`. The root
    /// group always holds `full` and cannot be given a stored permission.
    pub async fn set(
        scope: &mut RequestScope,
        project: &Project,
        group_id: i64,
        level: AccessLevel,
    ) -> Result<Permission, ServiceError> {
        if group_id == project.root_group_id() {
            return Err(ServiceError::OperationNotPermitted(
                "the root group always has full access".to_string(),
            ));
        }
        Group::get(&mut scope.tx, group_id).await?;

        let existing = scope
            .tx
            .find_one::<Permission>(
                Query::new()
                    .eq("project_id", project.id())
                    .eq("group_id", group_id)
                    .for_update(),
            )
            .await?;
        let permission = match existing {
            Some(mut permission) => {
                permission.level = level;
                scope.tx.update(&permission).await?;
                permission
            }
            None => {
                let mut permission = Permission {
                    id: 0,
                    project_id: project.id(),
                    group_id,
                    level,
                };
                scope.tx.insert(&mut permission).await?;
                permission
            }
        };

        scope.forget_access();
        scope.projector.sync_group_members(&mut scope.tx, group_id).await?;

        tracing::info!(
            project_id = project.id(),
            group_id,
            level = %level,
            "Permission set"
        );
        Ok(permission)
    }

    /// Every member of the group loses the project's host group unless
    /// another grant keeps it.
    pub async fn remove(scope: &mut RequestScope, project: &Project, group_id: i64) -> Result<(), ServiceError> {
        let removed = scope
            .tx
            .delete_where::<Permission>(
                Query::new()
                    .eq("project_id", project.id())
                    .eq("group_id", group_id),
            )
            .await?;
        if removed == 0 {
            return Err(ServiceError::not_found(format!(
                "Permission of group {} on project {}",
                group_id,
                project.alias()
            )));
        }

        scope.forget_access();
        scope.projector.sync_group_members(&mut scope.tx, group_id).await?;

        tracing::info!(project_id = project.id(), group_id, "Permission removed");
        Ok(())
    }

    /// Stored permissions of a project. The root group's implicit `full`
    /// grant is not included.
    pub async fn list(tx: &mut Tx, project_id: i64) -> Result<Vec<Permission>, ServiceError> {
        Ok(tx
            .list::<Permission>(
                Query::new()
                    .eq("project_id", project_id)
                    .order_by("group_id", Direction::Asc),
            )
            .await?)
    }
}

impl Record for Permission {
    const TABLE: &'static TableSchema = &PERMISSIONS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("project_id", self.project_id)
            .with("group_id", self.group_id)
            .with("access_level", self.level.alias())
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        let alias = row.text("access_level")?;
        Ok(Self {
            id: row.id()?,
            project_id: row.int("project_id")?,
            group_id: row.int("group_id")?,
            level: alias.parse().map_err(StoreError::Decode)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_is_stored_by_alias() {
        let permission = Permission {
            id: 0,
            project_id: 1,
            group_id: 2,
            level: AccessLevel::DataAdd,
        };
        let row = permission.to_row().with("id", 9);
        assert_eq!(row.text("access_level").unwrap(), "data_add");
        assert_eq!(Permission::from_row(&row).unwrap().level(), AccessLevel::DataAdd);
    }

    #[test]
    fn test_unknown_alias_is_decode_error() {
        let row = Row::new()
            .with("id", 1)
            .with("project_id", 1)
            .with("group_id", 1)
            .with("access_level", "owner");
        assert!(matches!(Permission::from_row(&row), Err(StoreError::Decode(_))));
    }
}
