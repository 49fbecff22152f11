use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use futures::FutureExt;
use service_core::error::AppError;
use service_core::middleware::{rate_limit::client_ip, tracing::RequestId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::extractors::{AuthMethod, Caller, ClientIp, SharedScope};
use super::{DurableWrite, RequestScope};
use crate::authorizations::{session_cookie, AuthContext, EntryPoint, COOKIE};
use crate::models::TokenKind;
use crate::reconciler::{Mode, ReconcilerError};
use crate::services::{metrics, ServiceError};
use crate::store::transaction;
use crate::AppState;

pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Runs a request inside its own transaction and command queue.
///
/// The caller is identified before dispatch. A 2xx/3xx response flushes
/// the queue (or, in suggest mode, turns it into `action_required`) and
/// commits; anything else rolls both back. Deferred writes are stored
/// afterwards either way.
pub async fn request_pipeline(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match run(state, req, next).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn run(state: AppState, mut req: Request, next: Next) -> Result<Response, AppError> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let ip = client_ip(&req)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let tx = state.store.begin().await.map_err(ServiceError::from)?;
    let projector = match state.reconciler.open(&request_id) {
        Ok(projector) => projector,
        Err(e) => {
            discard_tx(tx).await;
            return Err(match e {
                ReconcilerError::QueueBusy => {
                    tracing::warn!(request_id = %request_id, "Host command queue busy");
                    AppError::ServiceUnavailable
                }
                other => ServiceError::from(other).into(),
            });
        }
    };
    let mut scope = RequestScope::new(tx, projector);

    let authenticated = authenticate(&state, &mut scope, req.headers(), &ip).await;
    let (entry, caller) = match authenticated {
        Ok(found) => found,
        Err(e) => {
            let deferred = scope.take_deferred();
            discard(scope).await;
            persist_deferred(&state, deferred).await;
            return Err(e.into());
        }
    };

    let shared: SharedScope = Arc::new(Mutex::new(scope));
    req.extensions_mut().insert(caller.clone());
    req.extensions_mut().insert(ClientIp(ip));
    req.extensions_mut().insert(Arc::new(entry));
    req.extensions_mut().insert(shared.clone());

    let response = next.run(req).await;

    let mut scope = match Arc::try_unwrap(shared) {
        Ok(scope) => scope.into_inner(),
        Err(_) => {
            tracing::error!(request_id = %request_id, "Request scope still borrowed after dispatch");
            return Err(AppError::InternalError(anyhow::anyhow!(
                "request scope still borrowed"
            )));
        }
    };

    let deferred = scope.take_deferred();
    let status = response.status();
    let outcome = if status.is_success() || status.is_redirection() {
        finish(&state, scope)
            .await
            .map(|()| refresh_cookie(&state, &caller, response))
    } else {
        discard(scope).await;
        Ok(response)
    };
    persist_deferred(&state, deferred).await;
    outcome
}

/// Identifies the caller: API token, then session cookie, then passive
/// modules. A malformed or unknown API token is an error, not anonymity.
async fn authenticate(
    state: &AppState,
    scope: &mut RequestScope,
    headers: &HeaderMap,
    ip: &str,
) -> Result<(EntryPoint, Caller), ServiceError> {
    let entry = EntryPoint::load(&mut scope.tx, &state.modules).await?;

    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let plaintext = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Token "))
            .map(str::trim)
            .ok_or(ServiceError::NotAuthenticated)?
            .to_string();
        let user = state
            .tokens
            .apply(&mut scope.tx, &plaintext, TokenKind::Api)
            .await?
            .ok_or(ServiceError::NotAuthenticated)?;
        let caller = Caller {
            user: Some(user),
            method: AuthMethod::ApiToken(plaintext),
        };
        return Ok((entry, caller));
    }

    let cookie = CookieJar::from_headers(headers)
        .get(&state.config.cookie.name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let enabled = entry.aliases().to_vec();
    let credentials = serde_json::Value::Null;
    let mut ctx = AuthContext {
        state,
        scope,
        ip,
        credentials: &credentials,
        cookie: cookie.as_deref(),
        enabled: &enabled,
    };

    let mut caller = Caller::anonymous();
    if let (Some(module), Some(signed)) = (entry.get(COOKIE), cookie.as_ref()) {
        if let Some(user) = module.try_ui(&mut ctx).await? {
            caller = Caller {
                user: Some(user),
                method: AuthMethod::Cookie(signed.clone()),
            };
        }
    }
    if caller.user.is_none() {
        if let Some(user) = entry.try_passive(&mut ctx).await? {
            caller = Caller {
                user: Some(user),
                method: AuthMethod::Passive,
            };
        }
    }
    Ok((entry, caller))
}

async fn finish(state: &AppState, scope: RequestScope) -> Result<(), AppError> {
    let (tx, projector) = scope.into_parts();
    let commands = projector.take_commands();

    if !commands.is_empty() {
        match projector.mode() {
            Mode::Suggest => {
                discard_tx(tx).await;
                let rendered = commands.iter().map(|c| c.render()).collect();
                return Err(ServiceError::ActionRequired(rendered).into());
            }
            Mode::Active => {
                if let Err(e) = state.reconciler.execute(&commands).await {
                    discard_tx(tx).await;
                    return Err(ServiceError::from(e).into());
                }
            }
            Mode::Disabled => {}
        }
    }

    if let Err(e) = tx.commit().await {
        if !commands.is_empty() && projector.mode() == Mode::Active {
            tracing::error!(error = %e, count = commands.len(), "Commit failed after host commands ran");
        }
        return Err(ServiceError::from(e).into());
    }
    Ok(())
}

/// Runs once the request transaction is gone, so it never holds a second
/// connection alongside it.
async fn persist_deferred(state: &AppState, writes: Vec<DurableWrite>) {
    if writes.is_empty() {
        return;
    }
    let count = writes.len();
    let result = transaction(state.store.as_ref(), |tx| {
        async move {
            for write in writes {
                write.apply(tx).await?;
            }
            Ok::<_, ServiceError>(())
        }
        .boxed()
    })
    .await;
    if let Err(e) = result {
        tracing::error!(error = %e, count, "Deferred writes lost");
    }
}

async fn discard(scope: RequestScope) {
    let (tx, projector) = scope.into_parts();
    let dropped = projector.take_commands().len();
    if dropped > 0 {
        tracing::debug!(count = dropped, "Host commands discarded");
    }
    discard_tx(tx).await;
}

async fn discard_tx(tx: crate::store::Tx) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

/// Re-sends the session cookie so its `Max-Age` follows the sliding expiry.
fn refresh_cookie(state: &AppState, caller: &Caller, response: Response) -> Response {
    let AuthMethod::Cookie(signed) = &caller.method else {
        return response;
    };
    if response.headers().contains_key(header::SET_COOKIE) {
        return response;
    }
    let jar = CookieJar::new().add(session_cookie(state, signed.clone()));
    (jar, response).into_response()
}
