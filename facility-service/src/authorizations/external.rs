use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;

use super::{AuthContext, AuthorizationModule, ExternalProvider};
use crate::models::{ExternalAccount, ExternalSession, User};
use crate::pipeline::{DurableWrite, RequestScope};
use crate::services::{hash_secret, verify_secret, ServiceError};
use crate::store::Query;

const SESSION_LIFETIME_MINUTES: i64 = 10;
const SESSION_KEY_BYTES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalFlavor {
    /// Callback carries `code`, exchanged at the token endpoint.
    OAuth,
    /// Callback carries `access_token` directly.
    Bearer,
}

/// Sign-in through an external identity provider, bound to local users by
/// [`ExternalAccount`] rows.
pub struct ExternalAuthorization {
    alias: String,
    flavor: ExternalFlavor,
    provider: Arc<dyn ExternalProvider>,
}

impl ExternalAuthorization {
    pub fn new(alias: &str, flavor: ExternalFlavor, provider: Arc<dyn ExternalProvider>) -> Self {
        Self {
            alias: alias.to_string(),
            flavor,
            provider,
        }
    }

    /// Loads and deletes the session named by `state`. The delete is also
    /// deferred past the request, so a session is spent even when the
    /// callback fails and the request rolls back.
    async fn consume_session(&self, scope: &mut RequestScope, state: &str) -> Result<bool, ServiceError> {
        let Some((id, key)) = state.split_once(':') else {
            return Ok(false);
        };
        let Ok(id) = id.parse::<i64>() else {
            return Ok(false);
        };

        let session = scope
            .tx
            .find_one::<ExternalSession>(Query::new().eq("id", id).for_update())
            .await?;
        if session.is_some() {
            scope.tx.delete::<ExternalSession>(id).await?;
            scope.defer(DurableWrite::SpendSession(id));
        }

        Ok(session.is_some_and(|s| {
            s.provider == self.alias
                && Utc::now() < s.expires_at
                && verify_secret(key, &s.session_key_hash)
        }))
    }

    async fn account_key(
        &self,
        code: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<Option<String>, ServiceError> {
        let access_token = match self.flavor {
            ExternalFlavor::OAuth => {
                let Some(code) = code else {
                    return Ok(None);
                };
                self.provider.exchange_code(code).await?
            }
            ExternalFlavor::Bearer => match access_token {
                Some(token) => token.to_string(),
                None => return Ok(None),
            },
        };
        Ok(Some(self.provider.fetch_account_key(&access_token).await?))
    }
}

#[async_trait]
impl AuthorizationModule for ExternalAuthorization {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn process_auxiliary(&self, ctx: &mut AuthContext<'_>) -> Result<Option<String>, ServiceError> {
        let mut key = [0u8; SESSION_KEY_BYTES];
        OsRng.fill_bytes(&mut key);
        let key = URL_SAFE_NO_PAD.encode(key);

        let mut session = ExternalSession {
            id: 0,
            provider: self.alias.clone(),
            session_key_hash: hash_secret(&key),
            expires_at: Utc::now() + Duration::minutes(SESSION_LIFETIME_MINUTES),
        };
        ctx.scope.tx.insert(&mut session).await?;

        let url = self
            .provider
            .authorize_url(&format!("{}:{}", session.id, key))?;
        tracing::info!(provider = %self.alias, session_id = session.id, "Redirecting to external provider");
        Ok(Some(url))
    }

    async fn try_ui(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        let Some(state) = ctx.credential("state") else {
            return Ok(None);
        };
        if !self.consume_session(ctx.scope, state).await? {
            tracing::warn!(provider = %self.alias, ip = %ctx.ip, "Unknown or expired external session");
            return Ok(None);
        }

        let (code, access_token) = (ctx.credential("code"), ctx.credential("access_token"));
        let key = match self.account_key(code, access_token).await {
            Ok(Some(key)) => key,
            Ok(None) => return Ok(None),
            Err(ServiceError::RemoteProviderError(e)) => {
                tracing::warn!(provider = %self.alias, error = %e, "External provider failed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(account) = ExternalAccount::find(&mut ctx.scope.tx, &self.alias, &key).await? else {
            tracing::info!(provider = %self.alias, "No local user for external account");
            return Ok(None);
        };
        let Some(user) = ctx.scope.tx.find::<User>(account.user_id).await? else {
            return Ok(None);
        };

        if user.is_support() || user.is_locked() {
            tracing::warn!(user_id = user.id(), provider = %self.alias, "External sign-in refused");
            return Ok(None);
        }
        Ok(Some(user))
    }
}
