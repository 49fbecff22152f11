use serde::{Deserialize, Serialize};

use crate::models::{AccessLevel, Permission, Project};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectResponse {
    pub id: i64,
    pub alias: String,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub root_group: i64,
    pub project_dir: Option<String>,
    pub unix_group: Option<String>,
    /// The caller's level on the project.
    pub access_level: AccessLevel,
}

impl ProjectResponse {
    pub fn new(project: &Project, access_level: AccessLevel) -> Self {
        Self {
            id: project.id(),
            alias: project.alias().to_string(),
            name: project.name().to_string(),
            description: project.description().map(str::to_string),
            avatar: project.avatar().map(str::to_string),
            root_group: project.root_group_id(),
            project_dir: project.project_dir().map(str::to_string),
            unix_group: project.unix_group().map(str::to_string),
            access_level,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub alias: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub root_group: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub alias: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub root_group: Option<i64>,
    pub project_dir: Option<String>,
    pub unix_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PermissionResponse {
    pub group: i64,
    pub access_level: AccessLevel,
    /// The root group's implicit grant; never stored.
    pub is_root: bool,
}

impl From<&Permission> for PermissionResponse {
    fn from(permission: &Permission) -> Self {
        Self {
            group: permission.group_id(),
            access_level: permission.level(),
            is_root: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetPermissionRequest {
    pub group: i64,
    pub access_level: AccessLevel,
}
