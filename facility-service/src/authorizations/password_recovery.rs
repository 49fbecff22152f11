use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};

use super::{AuthContext, AuthorizationModule, PASSWORD_RECOVERY};
use crate::models::User;
use crate::pipeline::RequestScope;
use crate::services::{hash_secret, verify_secret, ServiceError};
use crate::AppState;

/// One-shot activation codes, `"<user_id>:<secret>"`, sent by mail.
pub struct PasswordRecovery;

/// Stores a fresh activation code on `user` and mails the activation link.
///
/// Returns the plaintext code.
pub async fn issue_code(state: &AppState, scope: &mut RequestScope, user: &mut User) -> Result<String, ServiceError> {
    let Some(email) = user.email().map(str::to_string) else {
        return Err(ServiceError::OperationNotPermitted(
            "user has no e-mail address".to_string(),
        ));
    };

    let mut secret = vec![0u8; state.config.tokens.secret_bytes];
    OsRng.fill_bytes(&mut secret);
    let secret = URL_SAFE_NO_PAD.encode(secret);
    let code = format!("{}:{}", user.id(), secret);

    let expires = Utc::now() + state.config.tokens.activation_code_lifetime;
    user.set_activation_code(Some(hash_secret(&secret)), Some(expires));
    user.update(scope).await?;

    let link = format!(
        "{}/activate/?code={}",
        state.config.security.public_url.trim_end_matches('/'),
        code
    );
    state
        .email
        .send_activation_code(&email, user.login(), &link)
        .await?;

    tracing::info!(user_id = user.id(), expires = %expires, "Activation code issued");
    Ok(code)
}

fn split_code(code: &str) -> Option<(i64, &str)> {
    let (id, secret) = code.trim().split_once(':')?;
    let id = id.parse().ok()?;
    (!secret.is_empty()).then_some((id, secret))
}

impl PasswordRecovery {
    async fn redeem(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        let Some(code) = ctx.credential("activation_code") else {
            return Ok(None);
        };
        let Some((user_id, secret)) = split_code(code) else {
            ctx.state.throttler.record_failure(ctx.scope, ctx.ip, None);
            return Ok(None);
        };

        let candidate = ctx.scope.tx.find::<User>(user_id).await?;
        let known_id = candidate.as_ref().map(User::id);
        ctx.state
            .throttler
            .check(&mut ctx.scope.tx, ctx.ip, known_id)
            .await?;

        let now = Utc::now();
        let valid = candidate.filter(|user| {
            !user.is_locked()
                && user.activation_code_expires().is_some_and(|expires| now < expires)
                && user
                    .activation_code_hash()
                    .is_some_and(|hash| verify_secret(secret, hash))
        });

        let Some(mut user) = valid else {
            tracing::warn!(ip = %ctx.ip, user_id = ?known_id, "Invalid activation code");
            ctx.state.throttler.record_failure(ctx.scope, ctx.ip, known_id);
            return Ok(None);
        };

        user.set_activation_code(None, None);
        user.update(ctx.scope).await?;
        tracing::info!(user_id = user.id(), "Activation code redeemed");
        Ok(Some(user))
    }
}

#[async_trait]
impl AuthorizationModule for PasswordRecovery {
    fn alias(&self) -> &str {
        PASSWORD_RECOVERY
    }

    async fn try_api(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        self.redeem(ctx).await
    }

    async fn try_ui(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        self.redeem(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_code() {
        assert_eq!(split_code("5:abc"), Some((5, "abc")));
        assert_eq!(split_code("5:"), None);
        assert_eq!(split_code("five:abc"), None);
        assert_eq!(split_code("abc"), None);
    }
}
