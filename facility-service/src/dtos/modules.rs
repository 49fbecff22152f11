use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct UpdateModuleRequest {
    pub is_enabled: Option<bool>,
    pub is_application: Option<bool>,
    pub position: Option<i64>,
    pub user_settings: Option<serde_json::Value>,
}
