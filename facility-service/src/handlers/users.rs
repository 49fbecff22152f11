use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::authorizations::password_recovery;
use crate::dtos::{
    require_fields,
    users::{
        CreateExternalAccountRequest, CreateUserRequest, ExternalAccountResponse,
        UpdateUserRequest, UserResponse,
    },
};
use crate::models::{ExternalAccount, User};
use crate::pipeline::{Scope, Superuser};
use crate::services::ServiceError;
use crate::utils::password::Password;
use crate::AppState;

/// Applies the fields present in `req`; setters validate each value.
pub(crate) fn apply_changes(user: &mut User, req: UpdateUserRequest) -> Result<(), ServiceError> {
    if let Some(login) = req.login {
        user.set_login(&login)?;
    }
    if let Some(password) = req.password {
        user.set_password(&Password::new(password))?;
    }
    if let Some(name) = req.name {
        user.set_name(Some(name))?;
    }
    if let Some(surname) = req.surname {
        user.set_surname(Some(surname))?;
    }
    if let Some(email) = req.email {
        user.set_email(Some(email))?;
    }
    if let Some(phone) = req.phone {
        user.set_phone(Some(phone))?;
    }
    if let Some(avatar) = req.avatar {
        user.set_avatar(Some(avatar))?;
    }
    if let Some(locked) = req.is_locked {
        user.set_locked(locked);
    }
    if let Some(superuser) = req.is_superuser {
        user.set_superuser(superuser);
    }
    if req.unix_group.is_some() {
        user.set_unix_group(req.unix_group)?;
    }
    if req.home_dir.is_some() {
        user.set_home_dir(req.home_dir)?;
    }
    Ok(())
}

pub async fn list_users(
    _admin: Superuser,
    mut scope: Scope,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = User::list(&mut scope.tx).await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

pub async fn create_user(
    Superuser(admin): Superuser,
    mut scope: Scope,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    require_fields(&[("login", req.login.is_some())])?;
    let login = req.login.unwrap_or_default();

    let mut user = User::new(&login)?;
    apply_changes(
        &mut user,
        UpdateUserRequest {
            password: req.password,
            name: req.name,
            surname: req.surname,
            email: req.email,
            phone: req.phone,
            is_locked: Some(req.is_locked),
            is_superuser: Some(req.is_superuser),
            ..Default::default()
        },
    )?;
    user.create(&mut scope).await?;

    tracing::info!(admin_id = admin.id(), user_id = user.id(), "User created by superuser");
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

pub async fn get_user(
    _admin: Superuser,
    mut scope: Scope,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, AppError> {
    let user = User::get(&mut scope.tx, id).await?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn update_user(
    _admin: Superuser,
    mut scope: Scope,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    req.validate()?;
    let mut user = User::get(&mut scope.tx, id).await?;
    if user.is_support() && req.is_locked == Some(true) {
        return Err(ServiceError::OperationNotPermitted(
            "the support user cannot be locked".to_string(),
        )
        .into());
    }
    apply_changes(&mut user, req)?;
    user.update(&mut scope).await?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn delete_user(
    Superuser(admin): Superuser,
    mut scope: Scope,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let mut user = User::get(&mut scope.tx, id).await?;
    if user.is_support() {
        return Err(ServiceError::OperationNotPermitted(
            "the support user cannot be deleted".to_string(),
        )
        .into());
    }
    user.delete(&mut scope).await?;

    tracing::info!(admin_id = admin.id(), user_id = id, "User deleted by superuser");
    Ok(StatusCode::NO_CONTENT)
}

/// Mails a fresh activation code to the user.
pub async fn issue_activation_code(
    State(state): State<AppState>,
    _admin: Superuser,
    mut scope: Scope,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let mut user = User::get(&mut scope.tx, id).await?;
    password_recovery::issue_code(&state, &mut scope, &mut user).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_external_accounts(
    _admin: Superuser,
    mut scope: Scope,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ExternalAccountResponse>>, AppError> {
    let user = User::get(&mut scope.tx, id).await?;
    let accounts = ExternalAccount::list_for_user(&mut scope.tx, user.id()).await?;
    Ok(Json(accounts.iter().map(ExternalAccountResponse::from).collect()))
}

pub async fn create_external_account(
    _admin: Superuser,
    mut scope: Scope,
    Path(id): Path<i64>,
    Json(req): Json<CreateExternalAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let user = User::get(&mut scope.tx, id).await?;
    if user.is_support() {
        return Err(ServiceError::OperationNotPermitted(
            "the support user cannot sign in through external providers".to_string(),
        )
        .into());
    }

    let mut account = ExternalAccount::new(user.id(), &req.provider, &req.account_key)?;
    account.create(&mut scope.tx).await?;
    Ok((StatusCode::CREATED, Json(ExternalAccountResponse::from(&account))))
}

pub async fn delete_external_account(
    _admin: Superuser,
    mut scope: Scope,
    Path((id, account_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    let account = scope
        .tx
        .find::<ExternalAccount>(account_id)
        .await
        .map_err(ServiceError::from)?
        .filter(|account| account.user_id == id)
        .ok_or_else(|| ServiceError::not_found(format!("External account {}", account_id)))?;
    account.delete(&mut scope.tx).await?;
    Ok(StatusCode::NO_CONTENT)
}
