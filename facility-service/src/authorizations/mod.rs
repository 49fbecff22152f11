//! Authorization entry point.
//!
//! Enabled module descriptors of the `authorizations` entry point are read
//! once per request, turned into module instances by the process-wide
//! [`ModuleRegistry`] and consulted in `position` order until one of them
//! yields a user.

mod automatic;
mod cookie;
mod external;
mod provider;
mod registry;
mod standard;

pub mod password_recovery;

pub use automatic::AutomaticAuthorization;
pub use cookie::{removal_cookie, session_cookie, CookieAuthorization};
pub use external::{ExternalAuthorization, ExternalFlavor};
pub use password_recovery::PasswordRecovery;
pub use provider::{ExternalProvider, HttpProvider, MockProvider};
pub use registry::{ModuleFactory, ModuleRegistry};
pub use standard::StandardAuthorization;

use async_trait::async_trait;
use axum_extra::extract::cookie::Cookie;

use crate::models::{ModuleDescriptor, TokenKind, User, AUTHORIZATIONS};
use crate::pipeline::RequestScope;
use crate::services::{metrics, IssuedToken, ServiceError};
use crate::store::Tx;
use crate::AppState;

pub const STANDARD: &str = "standard";
pub const AUTOMATIC: &str = "automatic";
pub const PASSWORD_RECOVERY: &str = "password_recovery";
pub const COOKIE: &str = "cookie";
pub const OAUTH: &str = "oauth";
pub const BEARER: &str = "bearer";

/// What a module may look at and touch while authenticating.
pub struct AuthContext<'a> {
    pub state: &'a AppState,
    pub scope: &'a mut RequestScope,
    pub ip: &'a str,
    /// Login body, or the query parameters of a provider callback.
    pub credentials: &'a serde_json::Value,
    /// Raw value of the signed session cookie, if any.
    pub cookie: Option<&'a str>,
    /// Aliases of every enabled module, in position order.
    pub enabled: &'a [String],
}

impl<'a> AuthContext<'a> {
    pub fn credential(&self, key: &str) -> Option<&'a str> {
        self.credentials
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

#[async_trait]
pub trait AuthorizationModule: Send + Sync {
    fn alias(&self) -> &str;

    /// Passive modules authenticate requests that carry no credentials.
    fn is_passive(&self) -> bool {
        false
    }

    async fn try_api(&self, _ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        Ok(None)
    }

    async fn try_ui(&self, _ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        Ok(None)
    }

    /// Returns the URL the browser should be sent to, if the module has an
    /// auxiliary leg.
    async fn process_auxiliary(&self, _ctx: &mut AuthContext<'_>) -> Result<Option<String>, ServiceError> {
        Ok(None)
    }
}

struct LoadedModule {
    descriptor: ModuleDescriptor,
    module: Box<dyn AuthorizationModule>,
}

/// The enabled modules of one request.
pub struct EntryPoint {
    modules: Vec<LoadedModule>,
    aliases: Vec<String>,
}

impl EntryPoint {
    pub async fn load(tx: &mut Tx, registry: &ModuleRegistry) -> Result<Self, ServiceError> {
        let mut modules = Vec::new();
        for descriptor in ModuleDescriptor::list_enabled(tx, AUTHORIZATIONS).await? {
            match registry.build(&descriptor) {
                Ok(Some(module)) => modules.push(LoadedModule { descriptor, module }),
                Ok(None) => {
                    tracing::warn!(alias = %descriptor.alias(), "Enabled module has no implementation");
                }
                Err(e) => {
                    tracing::error!(alias = %descriptor.alias(), error = %e, "Module misconfigured, skipped");
                }
            }
        }
        let aliases = modules
            .iter()
            .map(|m| m.descriptor.alias().to_string())
            .collect();
        Ok(Self { modules, aliases })
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn is_enabled(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }

    pub fn get(&self, alias: &str) -> Option<&dyn AuthorizationModule> {
        self.modules
            .iter()
            .find(|m| m.descriptor.alias() == alias)
            .map(|m| m.module.as_ref())
    }

    /// First user produced by an active module's `try_api`.
    pub async fn try_api(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        for loaded in &self.modules {
            let alias = loaded.descriptor.alias();
            let outcome = loaded.module.try_api(ctx).await;
            match outcome {
                Ok(Some(user)) => {
                    metrics::record_login(alias, "success");
                    tracing::info!(module = %alias, user_id = user.id(), "User authenticated");
                    return Ok(Some(user));
                }
                Ok(None) => {}
                Err(e) => {
                    metrics::record_login(alias, "error");
                    return Err(e);
                }
            }
        }
        metrics::record_login("all", "failure");
        Ok(None)
    }

    /// Credential-less authentication, e.g. the automatic module.
    pub async fn try_passive(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        for loaded in self.modules.iter().filter(|m| m.module.is_passive()) {
            if let Some(user) = loaded.module.try_api(ctx).await? {
                tracing::debug!(module = %loaded.descriptor.alias(), user_id = user.id(), "Passive authentication");
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    pub async fn issue_api_token(&self, state: &AppState, tx: &mut Tx, user: &User) -> Result<IssuedToken, ServiceError> {
        state.tokens.issue(tx, user, TokenKind::Api).await
    }

    /// Session cookie for `user` when the cookie module is enabled.
    pub async fn issue_cookie(
        &self,
        state: &AppState,
        tx: &mut Tx,
        user: &User,
    ) -> Result<Option<Cookie<'static>>, ServiceError> {
        if !self.is_enabled(COOKIE) {
            return Ok(None);
        }
        let issued = state.tokens.issue(tx, user, TokenKind::Cookie).await?;
        let signed = state.signer.sign(&issued.plaintext);
        Ok(Some(session_cookie(state, signed)))
    }
}
