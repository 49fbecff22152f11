pub mod authorizations;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod reconciler;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    allowed_hosts::{allowed_hosts_middleware, AllowedHosts},
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use service_core::utils::Signer;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::authorizations::ModuleRegistry;
use crate::config::FacilityConfig;
use crate::pipeline::{metrics_middleware, request_pipeline};
use crate::reconciler::Reconciler;
use crate::services::{EmailProvider, Throttler, TokenStore};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FacilityConfig>,
    pub store: Arc<dyn Store>,
    pub reconciler: Arc<Reconciler>,
    pub tokens: TokenStore,
    pub throttler: Throttler,
    pub signer: Signer,
    pub email: Arc<dyn EmailProvider>,
    pub modules: Arc<ModuleRegistry>,
}

impl AppState {
    pub fn new(
        config: FacilityConfig,
        store: Arc<dyn Store>,
        reconciler: Arc<Reconciler>,
        email: Arc<dyn EmailProvider>,
        modules: ModuleRegistry,
    ) -> Result<Self, AppError> {
        let signer = Signer::new(config.security.signer_secret.clone()).map_err(AppError::ConfigError)?;
        Ok(Self {
            tokens: TokenStore::new(&config.tokens),
            throttler: Throttler::new(config.throttle.clone()),
            signer,
            store,
            reconciler,
            email,
            modules: Arc::new(modules),
            config: Arc::new(config),
        })
    }
}

fn api_routes() -> Router<AppState> {
    use handlers::{auth, groups, host, modules, profile, projects, users};

    Router::new()
        .route("/login/", post(auth::login))
        .route("/logout/", post(auth::logout))
        .route("/auth/:alias/", get(auth::auth_redirect))
        .route("/auth/:alias/callback/", get(auth::auth_callback))
        .route("/password-recovery/", post(auth::password_recovery))
        .route(
            "/profile/",
            get(profile::get_profile).patch(profile::update_profile),
        )
        .route("/profile/password-reset/", post(profile::reset_password))
        .route("/users/", get(users::list_users).post(users::create_user))
        .route(
            "/users/:id/",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route(
            "/users/:id/activation-code/",
            post(users::issue_activation_code),
        )
        .route(
            "/users/:id/external-accounts/",
            get(users::list_external_accounts).post(users::create_external_account),
        )
        .route(
            "/users/:id/external-accounts/:account_id/",
            delete(users::delete_external_account),
        )
        .route("/groups/", get(groups::list_groups).post(groups::create_group))
        .route(
            "/groups/:id/",
            get(groups::get_group)
                .patch(groups::update_group)
                .delete(groups::delete_group),
        )
        .route(
            "/groups/:id/users/",
            get(groups::list_members).post(groups::add_member),
        )
        .route("/groups/:id/users/:user_id/", delete(groups::remove_member))
        .route(
            "/projects/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/projects/:key/",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/projects/:key/permissions/",
            get(projects::list_permissions).post(projects::set_permission),
        )
        .route(
            "/projects/:key/permissions/:group_id/",
            delete(projects::delete_permission),
        )
        .route("/access-levels/", get(modules::list_access_levels))
        .route(
            "/modules/:name/",
            get(modules::list_modules).patch(modules::update_module),
        )
        .route("/host/sync/", post(host::sync_host))
}

pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // Every API call runs in its own transaction and command queue. The
    // timeout sits outside so a cancelled handler drops (and rolls back) both.
    let api = api_routes()
        .layer(from_fn_with_state(state.clone(), request_pipeline))
        .layer(TimeoutLayer::new(config.request_timeout));

    let ip_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    let allowed_hosts = AllowedHosts::new(config.security.allowed_hosts.clone());

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .with_state(state)
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn_with_state(allowed_hosts, allowed_hosts_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    config
                        .security
                        .allowed_origins
                        .iter()
                        .filter_map(|o| match o.parse::<HeaderValue>() {
                            Ok(origin) => Some(origin),
                            Err(e) => {
                                tracing::error!("Invalid CORS origin '{}': {}", o, e);
                                None
                            }
                        })
                        .collect::<Vec<HeaderValue>>(),
                )
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true),
        )
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "posix_mode": format!("{:?}", state.reconciler.mode()).to_lowercase(),
    })))
}
