//! Request and response bodies of the HTTP API.
//!
//! Optional text fields of update requests clear the stored value when sent
//! as an empty string and leave it untouched when absent.

pub mod auth;
pub mod groups;
pub mod modules;
pub mod projects;
pub mod users;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub detail: String,
}

impl DetailResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// `FieldRequired` for every listed field that is `None`.
pub(crate) fn require_fields(fields: &[(&str, bool)]) -> Result<(), crate::services::ServiceError> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(crate::services::ServiceError::FieldRequired(missing))
    }
}
