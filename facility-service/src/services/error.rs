use service_core::error::AppError;
use thiserror::Error;

use crate::reconciler::ReconcilerError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid value for {field}: {message}")]
    FieldInvalid { field: String, message: String },

    #[error("Required fields missing: {}", .0.join(", "))]
    FieldRequired(Vec<String>),

    #[error("{0} not found")]
    EntityNotFound(String),

    #[error("Duplicate entity: {0}")]
    EntityDuplicated(String),

    #[error("Entity constraint failed: {0}")]
    EntityConstraintFailed(String),

    #[error("Operation not permitted: {0}")]
    OperationNotPermitted(String),

    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Too many failed attempts, retry after {retry_after}s")]
    Throttled { retry_after: u64 },

    #[error("Host command failed: {0}")]
    OsCommandFailed(String),

    #[error("Host changes must be applied by an operator")]
    ActionRequired(Vec<String>),

    #[error("Remote provider error: {0}")]
    RemoteProviderError(String),

    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ServiceError::FieldInvalid {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::EntityNotFound(what.into())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { table, id } => {
                ServiceError::EntityNotFound(format!("{} {}", table, id))
            }
            StoreError::Duplicate { table, detail } => {
                ServiceError::EntityDuplicated(format!("{} ({})", table, detail))
            }
            StoreError::Constraint { table, detail } => {
                ServiceError::EntityConstraintFailed(format!("{} ({})", table, detail))
            }
            other => ServiceError::Store(other),
        }
    }
}

impl From<ReconcilerError> for ServiceError {
    fn from(err: ReconcilerError) -> Self {
        match err {
            ReconcilerError::CommandFailed { .. }
            | ReconcilerError::Spawn { .. }
            | ReconcilerError::Timeout(_) => {
                ServiceError::OsCommandFailed(err.to_string())
            }
            other => ServiceError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::FieldInvalid { field, message } => AppError::FieldInvalid { field, message },
            ServiceError::FieldRequired(fields) => AppError::FieldRequired(fields),
            ServiceError::EntityNotFound(what) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", what))
            }
            ServiceError::EntityDuplicated(what) => AppError::Duplicate(anyhow::anyhow!(what)),
            ServiceError::EntityConstraintFailed(what) => {
                AppError::ConstraintFailed(anyhow::anyhow!(what))
            }
            ServiceError::OperationNotPermitted(msg) => AppError::OperationNotPermitted(msg),
            ServiceError::NotAuthenticated => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication credentials were not provided or are invalid"))
            }
            ServiceError::PermissionDenied => {
                AppError::Forbidden(anyhow::anyhow!("You do not have permission to perform this action"))
            }
            ServiceError::Throttled { retry_after } => AppError::TooManyRequests(
                "Too many failed authorization attempts".to_string(),
                Some(retry_after),
            ),
            ServiceError::OsCommandFailed(msg) => AppError::PosixError(msg),
            ServiceError::ActionRequired(commands) => AppError::ActionRequired(commands.join("\n")),
            ServiceError::RemoteProviderError(msg) => AppError::BadGateway(msg),
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::EmailError(e) => AppError::EmailError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_entity_errors() {
        let err: ServiceError = StoreError::Duplicate {
            table: "users",
            detail: "users_login_key".to_string(),
        }
        .into();
        assert!(matches!(err, ServiceError::EntityDuplicated(_)));

        let err: ServiceError = StoreError::Constraint {
            table: "groups",
            detail: "governor".to_string(),
        }
        .into();
        assert!(matches!(err, ServiceError::EntityConstraintFailed(_)));

        let err: ServiceError = StoreError::NotFound {
            table: "projects",
            id: 4,
        }
        .into();
        assert!(matches!(err, ServiceError::EntityNotFound(_)));
    }

    #[test]
    fn test_throttled_keeps_retry_after() {
        let app: AppError = ServiceError::Throttled { retry_after: 3 }.into();
        assert!(matches!(app, AppError::TooManyRequests(_, Some(3))));
    }
}
