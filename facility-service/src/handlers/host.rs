use axum::Json;
use serde::Serialize;
use service_core::error::AppError;

use crate::pipeline::{RequestScope, Scope, Superuser};

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub queued: usize,
}

/// Recomputes the host state of every user and project. In suggest mode a
/// non-empty result comes back as `action_required`.
pub async fn sync_host(
    Superuser(admin): Superuser,
    mut scope: Scope,
) -> Result<Json<SyncResponse>, AppError> {
    let scope: &mut RequestScope = &mut scope;
    let queued = scope.projector.reconcile_all(&mut scope.tx).await?;

    tracing::info!(admin_id = admin.id(), queued, "Host reconciliation requested");
    Ok(Json(SyncResponse { queued }))
}
