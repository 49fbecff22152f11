use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use service_core::error::AppError;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::RequestScope;
use crate::authorizations::EntryPoint;
use crate::models::User;
use crate::services::ServiceError;

pub(crate) type SharedScope = Arc<Mutex<RequestScope>>;

/// How the caller of the current request was identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Anonymous,
    /// `Authorization: Token …`; carries the plaintext token.
    ApiToken(String),
    /// Session cookie; carries the signed cookie value.
    Cookie(String),
    Passive,
}

#[derive(Debug, Clone)]
pub struct Caller {
    pub user: Option<User>,
    pub method: AuthMethod,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            user: None,
            method: AuthMethod::Anonymous,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

fn missing(what: &str) -> AppError {
    AppError::InternalError(anyhow::anyhow!("{} missing from request extensions", what))
}

fn caller(parts: &Parts) -> Result<Caller, AppError> {
    parts
        .extensions
        .get::<Caller>()
        .cloned()
        .ok_or_else(|| missing("Caller"))
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller(parts)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ClientIp>()
            .cloned()
            .ok_or_else(|| missing("ClientIp"))
    }
}

/// Authenticated caller; anonymous requests are rejected with 401.
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller(parts)?
            .user
            .map(CurrentUser)
            .ok_or_else(|| ServiceError::NotAuthenticated.into())
    }
}

/// Authenticated superuser; 401 when anonymous, 403 otherwise.
pub struct Superuser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for Superuser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_superuser() {
            return Err(ServiceError::PermissionDenied.into());
        }
        Ok(Superuser(user))
    }
}

/// Enabled authorization modules of this request.
pub struct Modules(pub Arc<EntryPoint>);

#[async_trait]
impl<S> FromRequestParts<S> for Modules
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<EntryPoint>>()
            .cloned()
            .map(Modules)
            .ok_or_else(|| missing("EntryPoint"))
    }
}

/// Exclusive access to the request's transaction and command queue.
pub struct Scope(OwnedMutexGuard<RequestScope>);

impl Deref for Scope {
    type Target = RequestScope;

    fn deref(&self) -> &RequestScope {
        &self.0
    }
}

impl DerefMut for Scope {
    fn deref_mut(&mut self) -> &mut RequestScope {
        &mut self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Scope
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let shared = parts
            .extensions
            .get::<SharedScope>()
            .cloned()
            .ok_or_else(|| missing("RequestScope"))?;
        Ok(Scope(shared.lock_owned().await))
    }
}
