use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::ModuleDescriptor;
use crate::services::ServiceError;

/// Transport to an external identity provider.
#[async_trait]
pub trait ExternalProvider: Send + Sync {
    /// Where to send the browser; `state` must come back on the callback.
    fn authorize_url(&self, state: &str) -> Result<String, ServiceError>;

    /// Trades an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, ServiceError>;

    /// Identifier of the account the access token belongs to.
    async fn fetch_account_key(&self, access_token: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn remote(message: impl Into<String>) -> ServiceError {
    ServiceError::RemoteProviderError(message.into())
}

/// OAuth-style provider reached over HTTP. Settings come from the module
/// descriptor's `user_settings`.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    authorize_url: String,
    token_url: Option<String>,
    userinfo_url: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    scope: Option<String>,
    account_key_field: String,
}

impl HttpProvider {
    pub fn from_descriptor(
        descriptor: &ModuleDescriptor,
        public_url: &str,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let required = |key: &str| {
            descriptor
                .setting(key)
                .map(str::to_string)
                .ok_or_else(|| ServiceError::invalid("user_settings", format!("{} is not set", key)))
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Internal(e.into()))?;

        Ok(Self {
            client,
            authorize_url: required("authorize_url")?,
            token_url: descriptor.setting("token_url").map(str::to_string),
            userinfo_url: required("userinfo_url")?,
            client_id: required("client_id")?,
            client_secret: descriptor.setting("client_secret").map(str::to_string),
            redirect_uri: descriptor.setting("redirect_uri").map(str::to_string).unwrap_or_else(|| {
                format!("{}/api/v1/auth/{}/callback/", public_url, descriptor.alias())
            }),
            scope: descriptor.setting("scope").map(str::to_string),
            account_key_field: descriptor
                .setting("account_key_field")
                .unwrap_or("id")
                .to_string(),
        })
    }
}

#[async_trait]
impl ExternalProvider for HttpProvider {
    fn authorize_url(&self, state: &str) -> Result<String, ServiceError> {
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("state", state),
        ];
        if let Some(scope) = &self.scope {
            params.push(("scope", scope.as_str()));
        }
        Url::parse_with_params(&self.authorize_url, &params)
            .map(String::from)
            .map_err(|e| ServiceError::invalid("authorize_url", e.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ServiceError> {
        let token_url = self
            .token_url
            .as_deref()
            .ok_or_else(|| remote("token_url is not configured"))?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| remote(format!("Failed to contact provider: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, error = %error_text, "Code exchange failed");
            return Err(remote(format!("Code exchange failed with {}", status)));
        }

        response
            .json::<TokenResponse>()
            .await
            .map(|t| t.access_token)
            .map_err(|e| remote(format!("Failed to parse token response: {}", e)))
    }

    async fn fetch_account_key(&self, access_token: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| remote(format!("Failed to contact provider: {}", e)))?;

        if !response.status().is_success() {
            return Err(remote(format!("Account lookup failed with {}", response.status())));
        }

        let info: serde_json::Value = response
            .json()
            .await
            .map_err(|e| remote(format!("Failed to parse account info: {}", e)))?;

        match info.get(&self.account_key_field) {
            Some(serde_json::Value::String(key)) if !key.is_empty() => Ok(key.clone()),
            Some(serde_json::Value::Number(key)) => Ok(key.to_string()),
            _ => Err(remote(format!(
                "Account info has no {} field",
                self.account_key_field
            ))),
        }
    }
}

#[derive(Default)]
struct MockState {
    codes: HashMap<String, String>,
    accounts: HashMap<String, String>,
}

/// In-process provider for tests: codes map to access tokens, access tokens
/// to account keys.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
    failing: Arc<AtomicBool>,
}

impl MockProvider {
    pub const AUTHORIZE_URL: &'static str = "https://idp.test/authorize";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(self, code: &str, access_token: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.codes.insert(code.to_string(), access_token.to_string());
        }
        self
    }

    pub fn with_account(self, access_token: &str, account_key: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state
                .accounts
                .insert(access_token.to_string(), account_key.to_string());
        }
        self
    }

    /// Makes every remote call fail as if the provider were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), ServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(remote("provider unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalProvider for MockProvider {
    fn authorize_url(&self, state: &str) -> Result<String, ServiceError> {
        Url::parse_with_params(Self::AUTHORIZE_URL, &[("state", state)])
            .map(String::from)
            .map_err(|e| ServiceError::invalid("authorize_url", e.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ServiceError> {
        self.check_reachable()?;
        self.state
            .lock()
            .ok()
            .and_then(|s| s.codes.get(code).cloned())
            .ok_or_else(|| remote("unknown authorization code"))
    }

    async fn fetch_account_key(&self, access_token: &str) -> Result<String, ServiceError> {
        self.check_reachable()?;
        self.state
            .lock()
            .ok()
            .and_then(|s| s.accounts.get(access_token).cloned())
            .ok_or_else(|| remote("unknown access token"))
    }
}
