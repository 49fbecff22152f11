use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Host names accepted in the `Host` header. A `*` entry accepts any host.
#[derive(Debug, Clone)]
pub struct AllowedHosts(Arc<Vec<String>>);

impl AllowedHosts {
    pub fn new(hosts: Vec<String>) -> Self {
        Self(Arc::new(
            hosts.into_iter().map(|h| h.trim().to_lowercase()).collect(),
        ))
    }

    pub fn permits(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        let name = strip_port(&host);
        self.0.iter().any(|allowed| {
            allowed == "*"
                || allowed == name
                || allowed
                    .strip_prefix('.')
                    .is_some_and(|suffix| name == suffix || name.ends_with(&format!(".{}", suffix)))
        })
    }

    fn accepts_any(&self) -> bool {
        self.0.iter().any(|h| h == "*")
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split(']').next().map(|h| &h[1..]).unwrap_or(host);
    }
    host.rsplit_once(':').map(|(name, _)| name).unwrap_or(host)
}

pub async fn allowed_hosts_middleware(
    State(allowed): State<AllowedHosts>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if allowed.accepts_any() {
        return Ok(next.run(request).await);
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host());

    match host {
        Some(host) if allowed.permits(host) => Ok(next.run(request).await),
        other => {
            tracing::warn!(host = ?other, "Rejected request for disallowed host");
            Err(AppError::BadRequest(anyhow::anyhow!("Invalid host header")))
        }
    }
}
