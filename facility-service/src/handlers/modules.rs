use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::modules::UpdateModuleRequest;
use crate::models::{AccessLevelRecord, ModuleDescriptor};
use crate::pipeline::{Scope, Superuser};
use crate::services::ServiceError;
use crate::store::{Direction, Query};
use crate::AppState;

/// Seeded access levels, most permissive first.
pub async fn list_access_levels(mut scope: Scope) -> Result<Json<Vec<AccessLevelRecord>>, AppError> {
    let levels = scope
        .tx
        .list::<AccessLevelRecord>(Query::new().order_by("id", Direction::Asc))
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(levels))
}

/// Every module of an entry point, enabled or not, in position order.
pub async fn list_modules(
    _admin: Superuser,
    mut scope: Scope,
    Path(entry_point): Path<String>,
) -> Result<Json<Vec<ModuleDescriptor>>, AppError> {
    let modules = ModuleDescriptor::list(&mut scope.tx, &entry_point).await?;
    Ok(Json(modules))
}

/// Takes effect from the next request on.
pub async fn update_module(
    State(state): State<AppState>,
    Superuser(admin): Superuser,
    mut scope: Scope,
    Path(alias): Path<String>,
    Json(req): Json<UpdateModuleRequest>,
) -> Result<Json<ModuleDescriptor>, AppError> {
    let mut module = ModuleDescriptor::find_by_alias(&mut scope.tx, &alias)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("Module {}", alias)))?;

    if let Some(enabled) = req.is_enabled {
        if enabled && !state.modules.contains(&alias) {
            return Err(ServiceError::OperationNotPermitted(format!(
                "module {} has no implementation",
                alias
            ))
            .into());
        }
        module.set_enabled(enabled);
    }
    if let Some(application) = req.is_application {
        module.set_application(application);
    }
    if let Some(position) = req.position {
        module.set_position(position)?;
    }
    if let Some(settings) = req.user_settings {
        module.set_user_settings(settings)?;
    }
    module.update(&mut scope.tx).await?;

    tracing::info!(admin_id = admin.id(), alias = %alias, "Module settings changed");
    Ok(Json(module))
}
