//! Test helpers for facility-service integration tests.
//!
//! Every `TestApp` owns a fresh in-memory store, a recording mail sender
//! and a fake host, and drives the router in-process with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use facility_service::{
    authorizations::ModuleRegistry,
    bootstrap, build_router,
    config::FacilityConfig,
    models::TABLES,
    reconciler::{FakeHost, Mode, Reconciler},
    services::{EmailProvider, MockEmailService},
    store::{MemoryStore, Store, Tx},
    AppState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

pub const SUPPORT_PASSWORD: &str = "support";
pub const CLIENT_IP: &str = "203.0.113.7";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub email: MockEmailService,
    pub host: FakeHost,
}

/// Status, headers and JSON body (`Null` when empty) of one response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn set_cookie(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

pub fn test_config(mode: Mode) -> FacilityConfig {
    let mut config = FacilityConfig::default();
    config.log_level = "error".to_string();
    config.posix.mode = mode;
    config.rate_limit.global_ip_limit = 10_000;
    config
}

impl TestApp {
    /// Host reconciliation disabled.
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config(Mode::Disabled)).await
    }

    pub async fn spawn_in_mode(mode: Mode) -> Self {
        Self::spawn_with(test_config(mode)).await
    }

    pub async fn spawn_with(config: FacilityConfig) -> Self {
        let modules =
            ModuleRegistry::with_defaults(&config.security.public_url, config.external_timeout);
        Self::spawn_with_modules(config, modules).await
    }

    /// Same as [`TestApp::spawn_with`] with a caller-supplied module registry.
    pub async fn spawn_with_modules(config: FacilityConfig, modules: ModuleRegistry) -> Self {
        facility_service::services::metrics::init_metrics();

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(TABLES));
        let host = FakeHost::new();
        let reconciler = Arc::new(Reconciler::new(
            config.posix.clone(),
            Arc::new(host.clone()),
            Arc::new(host.clone()),
        ));
        let email = MockEmailService::new();
        let mailer: Arc<dyn EmailProvider> = Arc::new(email.clone());

        let state = AppState::new(config, store, reconciler, mailer, modules)
            .expect("Failed to build application state");
        bootstrap::run(&state).await.expect("Bootstrap failed");

        Self {
            router: build_router(state.clone()),
            state,
            email,
            host,
        }
    }

    pub async fn begin(&self) -> Tx {
        self.state.store.begin().await.expect("Failed to begin transaction")
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// JSON request authenticated with an API token when one is given.
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", CLIENT_IP);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Token {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> TestResponse {
        self.call("GET", uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        self.call("POST", uri, Some(token), Some(body)).await
    }

    pub async fn login_response(&self, login: &str, password: &str) -> TestResponse {
        self.call(
            "POST",
            "/api/v1/login/",
            None,
            Some(json!({ "login": login, "password": password })),
        )
        .await
    }

    pub async fn login(&self, login: &str, password: &str) -> String {
        let response = self.login_response(login, password).await;
        assert_eq!(
            response.status,
            StatusCode::OK,
            "Login of {} failed: {}",
            login,
            response.body
        );
        response.body["token"]
            .as_str()
            .expect("Login response carries a token")
            .to_string()
    }

    pub async fn support_token(&self) -> String {
        self.login("support", SUPPORT_PASSWORD).await
    }

    /// Creates a user through the API and returns its id.
    pub async fn create_user(&self, admin_token: &str, login: &str, password: &str) -> i64 {
        let response = self
            .post(
                "/api/v1/users/",
                admin_token,
                json!({ "login": login, "password": password, "name": login }),
            )
            .await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "Creating {} failed: {}",
            login,
            response.body
        );
        response.body["id"].as_i64().expect("User id")
    }

    pub async fn create_group(&self, token: &str, name: &str) -> i64 {
        let response = self
            .post("/api/v1/groups/", token, json!({ "name": name }))
            .await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "Creating group {} failed: {}",
            name,
            response.body
        );
        response.body["id"].as_i64().expect("Group id")
    }

    pub async fn add_member(&self, token: &str, group_id: i64, user_id: i64) {
        let response = self
            .post(
                &format!("/api/v1/groups/{}/users/", group_id),
                token,
                json!({ "user_id": user_id }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    }

    pub async fn create_project(&self, token: &str, alias: &str, root_group: i64) -> i64 {
        let response = self
            .post(
                "/api/v1/projects/",
                token,
                json!({ "alias": alias, "name": alias, "root_group": root_group }),
            )
            .await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "Creating project {} failed: {}",
            alias,
            response.body
        );
        response.body["id"].as_i64().expect("Project id")
    }

    /// Enables or disables one authorization module.
    pub async fn set_module(&self, token: &str, alias: &str, enabled: bool) {
        let response = self
            .call(
                "PATCH",
                &format!("/api/v1/modules/{}/", alias),
                Some(token),
                Some(json!({ "is_enabled": enabled })),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    }
}
