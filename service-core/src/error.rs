use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid value for {field}: {message}")]
    FieldInvalid { field: String, message: String },

    #[error("Required fields missing: {}", .0.join(", "))]
    FieldRequired(Vec<String>),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Operation not permitted: {0}")]
    OperationNotPermitted(String),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Duplicate entity: {0}")]
    Duplicate(anyhow::Error),

    #[error("Constraint failed: {0}")]
    ConstraintFailed(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Host command failed: {0}")]
    PosixError(String),

    #[error("Action required: {0}")]
    ActionRequired(String),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Bad Gateway: {0}")]
    BadGateway(String),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    fn new(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            fields: None,
            retry_after: None,
        }
    }
}

impl AppError {
    /// Stable machine-readable code placed in the `code` member of the body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::FieldInvalid { .. } => "field_invalid",
            AppError::FieldRequired(_) => "field_required",
            AppError::BadRequest(_) => "bad_request",
            AppError::OperationNotPermitted(_) => "operation_not_permitted",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "not_authenticated",
            AppError::Forbidden(_) => "permission_denied",
            AppError::Duplicate(_) => "entity_duplicated",
            AppError::ConstraintFailed(_) => "entity_constraint_failed",
            AppError::TooManyRequests(..) => "throttled",
            AppError::PosixError(_) => "posix_error",
            AppError::ActionRequired(_) => "action_required",
            AppError::BadGateway(_) => "bad_gateway",
            AppError::ServiceUnavailable => "service_unavailable",
            AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::EmailError(_)
            | AppError::ConfigError(_) => "internal_error",
        }
    }
}

fn validation_fields(err: &validator::ValidationErrors) -> BTreeMap<String, Vec<String>> {
    err.field_errors()
        .into_iter()
        .map(|(field, errors)| {
            let messages = errors
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();

        let (status, body) = match self {
            AppError::ValidationError(err) => {
                let mut body = ErrorResponse::new(code, "Validation error");
                body.fields = Some(validation_fields(&err));
                (StatusCode::BAD_REQUEST, body)
            }
            AppError::FieldInvalid { field, message } => {
                let mut body = ErrorResponse::new(code, format!("{}: {}", field, message));
                body.fields = Some(BTreeMap::from([(field, vec![message])]));
                (StatusCode::BAD_REQUEST, body)
            }
            AppError::FieldRequired(fields) => {
                let mut body = ErrorResponse::new(code, "Required fields are missing");
                body.fields = Some(
                    fields
                        .into_iter()
                        .map(|f| (f, vec!["This field is required".to_string()]))
                        .collect(),
                );
                (StatusCode::BAD_REQUEST, body)
            }
            AppError::BadRequest(err) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new(code, err.to_string()))
            }
            AppError::OperationNotPermitted(msg) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new(code, msg))
            }
            AppError::NotFound(err) => {
                (StatusCode::NOT_FOUND, ErrorResponse::new(code, err.to_string()))
            }
            AppError::Unauthorized(err) => {
                (StatusCode::UNAUTHORIZED, ErrorResponse::new(code, err.to_string()))
            }
            AppError::Forbidden(err) => {
                (StatusCode::FORBIDDEN, ErrorResponse::new(code, err.to_string()))
            }
            AppError::Duplicate(err) => {
                (StatusCode::CONFLICT, ErrorResponse::new(code, err.to_string()))
            }
            AppError::ConstraintFailed(err) => {
                (StatusCode::CONFLICT, ErrorResponse::new(code, err.to_string()))
            }
            AppError::TooManyRequests(msg, retry) => {
                let mut body = ErrorResponse::new(code, msg);
                body.retry_after = retry;
                (StatusCode::TOO_MANY_REQUESTS, body)
            }
            AppError::PosixError(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(code, msg)),
            AppError::ActionRequired(commands) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new(code, commands))
            }
            AppError::BadGateway(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse::new(code, format!("Bad Gateway: {}", msg)),
            ),
            AppError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new(code, "Service unavailable"),
            ),
            err @ (AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::EmailError(_)
            | AppError::ConfigError(_)) => {
                tracing::error!(error = %err, "Request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(code, "Internal server error"),
                )
            }
        };

        let retry_after = body.retry_after;
        let mut res = (status, Json(body)).into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_throttled_sets_retry_after() {
        let res = AppError::TooManyRequests("slow down".to_string(), Some(7)).into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("retry-after").unwrap(), "7");

        let body = body_json(res).await;
        assert_eq!(body["code"], "throttled");
        assert_eq!(body["retry_after"], 7);
    }

    #[tokio::test]
    async fn test_field_invalid_is_keyed_by_field() {
        let res = AppError::FieldInvalid {
            field: "login".to_string(),
            message: "too long".to_string(),
        }
        .into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let body = body_json(res).await;
        assert_eq!(body["code"], "field_invalid");
        assert_eq!(body["fields"]["login"][0], "too long");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let res = AppError::DatabaseError(anyhow::anyhow!("relation users does not exist"))
            .into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(res).await;
        assert_eq!(body["detail"], "Internal server error");
        assert!(!body.to_string().contains("relation"));
    }

    #[tokio::test]
    async fn test_action_required_carries_commands() {
        let res = AppError::ActionRequired("groupadd bob\nuseradd bob".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let body = body_json(res).await;
        assert_eq!(body["code"], "action_required");
        assert!(body["detail"].as_str().unwrap().contains("useradd bob"));
    }
}
