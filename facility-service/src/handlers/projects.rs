use axum::{extract::Path, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::{
    projects::{
        CreateProjectRequest, PermissionResponse, ProjectResponse, SetPermissionRequest,
        UpdateProjectRequest,
    },
    require_fields,
};
use crate::models::{AccessLevel, Group, Permission, Project, User};
use crate::pipeline::{CurrentUser, RequestScope, Scope};
use crate::services::{access, ServiceError};

/// Looks the project up and checks the caller's level. Projects the caller
/// cannot see at all are reported as missing.
async fn load(
    scope: &mut RequestScope,
    user: &User,
    key: &str,
    required: AccessLevel,
) -> Result<(Project, AccessLevel), ServiceError> {
    let project = Project::find_by_alias_or_id(&mut scope.tx, key)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("Project {}", key)))?;
    let level = access::require(scope, user, &project, required).await?;
    Ok((project, level))
}

/// Only the governor of a group (or a superuser) may root a project in it.
async fn check_root_group(scope: &mut RequestScope, user: &User, group_id: i64) -> Result<(), ServiceError> {
    let group = Group::get(&mut scope.tx, group_id).await?;
    if user.is_superuser() || group.governor_id() == user.id() {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied)
    }
}

pub async fn list_projects(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
) -> Result<Json<Vec<ProjectResponse>>, AppError> {
    let mut visible = Vec::new();
    for project in Project::list(&mut scope.tx).await? {
        let level = access::resolve(&mut scope, &user, &project).await?;
        if level != AccessLevel::NoAccess {
            visible.push(ProjectResponse::new(&project, level));
        }
    }
    Ok(Json(visible))
}

pub async fn create_project(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_fields(&[
        ("alias", req.alias.is_some()),
        ("name", req.name.is_some()),
        ("root_group", req.root_group.is_some()),
    ])?;
    let root_group = req.root_group.unwrap_or_default();
    check_root_group(&mut scope, &user, root_group).await?;

    let mut project = Project::new(
        req.alias.as_deref().unwrap_or_default(),
        req.name.as_deref().unwrap_or_default(),
        root_group,
    )?;
    if req.description.is_some() {
        project.set_description(req.description)?;
    }
    if req.avatar.is_some() {
        project.set_avatar(req.avatar)?;
    }
    project.create(&mut scope).await?;

    let level = access::resolve(&mut scope, &user, &project).await?;
    Ok((StatusCode::CREATED, Json(ProjectResponse::new(&project, level))))
}

pub async fn get_project(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(key): Path<String>,
) -> Result<Json<ProjectResponse>, AppError> {
    let (project, level) = load(&mut scope, &user, &key, AccessLevel::DataView).await?;
    Ok(Json(ProjectResponse::new(&project, level)))
}

pub async fn update_project(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(key): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, AppError> {
    let (mut project, _) = load(&mut scope, &user, &key, AccessLevel::Full).await?;

    if let Some(alias) = req.alias {
        project.set_alias(&alias)?;
    }
    if let Some(name) = req.name {
        project.set_name(&name)?;
    }
    if req.description.is_some() {
        project.set_description(req.description)?;
    }
    if req.avatar.is_some() {
        project.set_avatar(req.avatar)?;
    }
    if req.project_dir.is_some() {
        project.set_project_dir(req.project_dir)?;
    }
    if req.unix_group.is_some() {
        project.set_unix_group(req.unix_group)?;
    }
    if let Some(root_group) = req.root_group {
        if root_group != project.root_group_id() {
            check_root_group(&mut scope, &user, root_group).await?;
            project.set_root_group(root_group)?;
        }
    }
    project.update(&mut scope).await?;

    let level = access::resolve(&mut scope, &user, &project).await?;
    Ok(Json(ProjectResponse::new(&project, level)))
}

pub async fn delete_project(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    let (mut project, _) = load(&mut scope, &user, &key, AccessLevel::Full).await?;
    project.delete(&mut scope).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stored permissions preceded by the root group's implicit `full` grant.
pub async fn list_permissions(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(key): Path<String>,
) -> Result<Json<Vec<PermissionResponse>>, AppError> {
    let (project, _) = load(&mut scope, &user, &key, AccessLevel::Full).await?;

    let mut permissions = vec![PermissionResponse {
        group: project.root_group_id(),
        access_level: AccessLevel::Full,
        is_root: true,
    }];
    permissions.extend(
        Permission::list(&mut scope.tx, project.id())
            .await?
            .iter()
            .map(PermissionResponse::from),
    );
    Ok(Json(permissions))
}

pub async fn set_permission(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(key): Path<String>,
    Json(req): Json<SetPermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (project, _) = load(&mut scope, &user, &key, AccessLevel::Full).await?;
    let permission = Permission::set(&mut scope, &project, req.group, req.access_level).await?;
    Ok((StatusCode::CREATED, Json(PermissionResponse::from(&permission))))
}

pub async fn delete_permission(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path((key, group_id)): Path<(String, i64)>,
) -> Result<StatusCode, AppError> {
    let (project, _) = load(&mut scope, &user, &key, AccessLevel::Full).await?;
    Permission::remove(&mut scope, &project, group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
