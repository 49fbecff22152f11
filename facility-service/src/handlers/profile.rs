use axum::{extract::State, Json};
use service_core::error::AppError;
use validator::Validate;

use super::users::apply_changes;
use crate::dtos::users::{PasswordResetResponse, ProfileUpdateRequest, UserResponse};
use crate::pipeline::{CurrentUser, Scope};
use crate::services::ServiceError;
use crate::utils::password::Password;
use crate::AppState;

const GENERATED_PASSWORD_LENGTH: usize = 16;

pub async fn get_profile(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}

pub async fn update_profile(
    CurrentUser(mut user): CurrentUser,
    mut scope: Scope,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Json<UserResponse>, AppError> {
    req.validate()?;
    apply_changes(&mut user, req.into())?;
    user.update(&mut scope).await?;
    Ok(Json(UserResponse::from(&user)))
}

/// Replaces the caller's password with a random one, mails and returns it.
pub async fn reset_password(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    mut scope: Scope,
) -> Result<Json<PasswordResetResponse>, AppError> {
    let Some(email) = user.email().map(str::to_string) else {
        return Err(ServiceError::OperationNotPermitted(
            "user has no e-mail address".to_string(),
        )
        .into());
    };

    let password = Password::generate(GENERATED_PASSWORD_LENGTH);
    user.set_password(&password)?;
    user.update(&mut scope).await?;
    state
        .email
        .send_password(&email, user.login(), password.expose())
        .await?;

    tracing::info!(user_id = user.id(), "Password reset");
    Ok(Json(PasswordResetResponse {
        password: password.expose().to_string(),
    }))
}
