use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;
use std::collections::HashMap;
use validator::Validate;

use crate::authorizations::{password_recovery, removal_cookie, AuthContext, PASSWORD_RECOVERY};
use crate::dtos::{
    auth::{LoginResponse, PasswordRecoveryRequest},
    users::UserResponse,
    DetailResponse,
};
use crate::models::{TokenKind, User};
use crate::pipeline::{AuthMethod, Caller, ClientIp, Modules, Scope};
use crate::services::ServiceError;
use crate::AppState;

/// Tries every enabled module's API hook with the posted credentials.
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Modules(entry): Modules,
    mut scope: Scope,
    Json(credentials): Json<serde_json::Value>,
) -> Result<Response, AppError> {
    let enabled = entry.aliases().to_vec();
    let user = {
        let mut ctx = AuthContext {
            state: &state,
            scope: &mut scope,
            ip: &ip,
            credentials: &credentials,
            cookie: None,
            enabled: &enabled,
        };
        entry.try_api(&mut ctx).await?
    };
    let Some(user) = user else {
        tracing::info!(ip = %ip, "Login rejected");
        return Err(ServiceError::NotAuthenticated.into());
    };

    let issued = entry.issue_api_token(&state, &mut scope.tx, &user).await?;
    let cookie = entry.issue_cookie(&state, &mut scope.tx, &user).await?;

    let body = Json(LoginResponse {
        token: issued.plaintext,
        user: UserResponse::from(&user),
    });
    Ok(match cookie {
        Some(cookie) => (CookieJar::new().add(cookie), body).into_response(),
        None => body.into_response(),
    })
}

/// Revokes the token the request was authenticated with.
pub async fn logout(
    State(state): State<AppState>,
    caller: Caller,
    mut scope: Scope,
) -> Result<impl IntoResponse, AppError> {
    let Some(user) = caller.user else {
        return Err(ServiceError::NotAuthenticated.into());
    };

    let revoked = match &caller.method {
        AuthMethod::ApiToken(plaintext) => {
            state
                .tokens
                .revoke(&mut scope.tx, plaintext, TokenKind::Api)
                .await?
        }
        AuthMethod::Cookie(signed) => match state.signer.unsign(signed) {
            Some(plaintext) => {
                state
                    .tokens
                    .revoke(&mut scope.tx, plaintext, TokenKind::Cookie)
                    .await?
            }
            None => false,
        },
        AuthMethod::Passive | AuthMethod::Anonymous => false,
    };
    tracing::info!(user_id = user.id(), revoked, "User logged out");

    Ok((
        CookieJar::new().add(removal_cookie(&state)),
        StatusCode::NO_CONTENT,
    ))
}

/// First leg of an external sign-in: redirects the browser to the provider.
pub async fn auth_redirect(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Modules(entry): Modules,
    mut scope: Scope,
    Path(alias): Path<String>,
) -> Result<Redirect, AppError> {
    let module = entry
        .get(&alias)
        .ok_or_else(|| ServiceError::not_found(format!("Authorization module {}", alias)))?;

    let enabled = entry.aliases().to_vec();
    let credentials = serde_json::Value::Null;
    let mut ctx = AuthContext {
        state: &state,
        scope: &mut scope,
        ip: &ip,
        credentials: &credentials,
        cookie: None,
        enabled: &enabled,
    };
    let url = module
        .process_auxiliary(&mut ctx)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("Redirect of module {}", alias)))?;

    Ok(Redirect::to(&url))
}

/// Provider callback. On success the browser gets a session cookie and is
/// sent home; without the cookie module an API token is returned instead.
pub async fn auth_callback(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Modules(entry): Modules,
    mut scope: Scope,
    Path(alias): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let module = entry
        .get(&alias)
        .ok_or_else(|| ServiceError::not_found(format!("Authorization module {}", alias)))?;

    let credentials = serde_json::Value::Object(
        params
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect(),
    );
    let enabled = entry.aliases().to_vec();
    let user = {
        let mut ctx = AuthContext {
            state: &state,
            scope: &mut scope,
            ip: &ip,
            credentials: &credentials,
            cookie: None,
            enabled: &enabled,
        };
        module.try_ui(&mut ctx).await?
    };
    let Some(user) = user else {
        return Err(ServiceError::NotAuthenticated.into());
    };

    match entry.issue_cookie(&state, &mut scope.tx, &user).await? {
        Some(cookie) => Ok((CookieJar::new().add(cookie), Redirect::to("/")).into_response()),
        None => {
            let issued = entry.issue_api_token(&state, &mut scope.tx, &user).await?;
            Ok(Json(LoginResponse {
                token: issued.plaintext,
                user: UserResponse::from(&user),
            })
            .into_response())
        }
    }
}

/// Mails an activation code to the owner of `email`. The answer is the same
/// whether or not such a user exists.
pub async fn password_recovery(
    State(state): State<AppState>,
    Modules(entry): Modules,
    mut scope: Scope,
    Json(req): Json<PasswordRecoveryRequest>,
) -> Result<Json<DetailResponse>, AppError> {
    req.validate()?;
    let accepted = Json(DetailResponse::new(
        "If the address is known, an activation link has been sent",
    ));

    if !entry.is_enabled(PASSWORD_RECOVERY) {
        tracing::debug!("Password recovery requested while the module is disabled");
        return Ok(accepted);
    }

    let candidate = User::find_by_email(&mut scope.tx, &req.email).await?;
    let Some(mut user) = candidate.filter(|u| !u.is_locked() && !u.is_support()) else {
        tracing::info!("Password recovery for unknown address");
        return Ok(accepted);
    };

    if let Err(e) = password_recovery::issue_code(&state, &mut scope, &mut user).await {
        tracing::warn!(user_id = user.id(), error = %e, "Password recovery failed");
    }
    Ok(accepted)
}
