use axum::{extract::Path, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::{
    groups::{AddMemberRequest, CreateGroupRequest, GroupResponse, UpdateGroupRequest},
    require_fields,
    users::UserResponse,
};
use crate::models::{Group, User};
use crate::pipeline::{CurrentUser, Scope};
use crate::services::ServiceError;
use crate::store::Tx;

async fn load_as_member(tx: &mut Tx, user: &User, id: i64) -> Result<Group, ServiceError> {
    let group = Group::get(tx, id).await?;
    if user.is_superuser() || group.is_member(tx, user.id()).await? {
        Ok(group)
    } else {
        Err(ServiceError::PermissionDenied)
    }
}

async fn load_as_governor(tx: &mut Tx, user: &User, id: i64) -> Result<Group, ServiceError> {
    let group = Group::get(tx, id).await?;
    if user.is_superuser() || group.governor_id() == user.id() {
        Ok(group)
    } else {
        Err(ServiceError::PermissionDenied)
    }
}

/// Superusers see every group, everyone else the groups they belong to.
pub async fn list_groups(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
) -> Result<Json<Vec<GroupResponse>>, AppError> {
    let groups = Group::list(&mut scope.tx).await?;
    let groups: Vec<Group> = if user.is_superuser() {
        groups
    } else {
        let own = Group::ids_of_user(&mut scope.tx, user.id()).await?;
        groups
            .into_iter()
            .filter(|g| own.contains(&g.id()))
            .collect()
    };
    Ok(Json(groups.iter().map(GroupResponse::from).collect()))
}

pub async fn create_group(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_fields(&[("name", req.name.is_some())])?;
    let governor = req.governor.unwrap_or(user.id());
    if governor != user.id() && !user.is_superuser() {
        return Err(ServiceError::PermissionDenied.into());
    }

    let mut group = Group::new(req.name.as_deref().unwrap_or_default(), governor)?;
    group.create(&mut scope).await?;
    Ok((StatusCode::CREATED, Json(GroupResponse::from(&group))))
}

pub async fn get_group(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(id): Path<i64>,
) -> Result<Json<GroupResponse>, AppError> {
    let group = load_as_member(&mut scope.tx, &user, id).await?;
    Ok(Json(GroupResponse::from(&group)))
}

pub async fn update_group(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(id): Path<i64>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<Json<GroupResponse>, AppError> {
    let mut group = load_as_governor(&mut scope.tx, &user, id).await?;
    if let Some(name) = req.name {
        group.set_name(&name)?;
    }
    if let Some(governor) = req.governor {
        group.set_governor(governor)?;
    }
    group.update(&mut scope).await?;
    Ok(Json(GroupResponse::from(&group)))
}

pub async fn delete_group(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let mut group = load_as_governor(&mut scope.tx, &user, id).await?;
    group.delete(&mut scope).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(id): Path<i64>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let group = load_as_member(&mut scope.tx, &user, id).await?;
    let members = group.members(&mut scope.tx).await?;
    Ok(Json(members.iter().map(UserResponse::from).collect()))
}

pub async fn add_member(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path(id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = load_as_governor(&mut scope.tx, &user, id).await?;
    group.add_member(&mut scope, req.user_id).await?;
    let member = User::get(&mut scope.tx, req.user_id).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&member))))
}

pub async fn remove_member(
    CurrentUser(user): CurrentUser,
    mut scope: Scope,
    Path((id, user_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    let group = load_as_governor(&mut scope.tx, &user, id).await?;
    group.remove_member(&mut scope, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
