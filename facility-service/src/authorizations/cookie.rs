use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, SameSite};

use super::{AuthContext, AuthorizationModule, COOKIE};
use crate::models::{TokenKind, User};
use crate::services::ServiceError;
use crate::AppState;

/// Browser session transport: a cookie token signed with the server secret.
pub struct CookieAuthorization;

/// `Set-Cookie` value carrying a signed cookie token.
pub fn session_cookie(state: &AppState, signed: String) -> Cookie<'static> {
    let lifetime = state.tokens.lifetime(TokenKind::Cookie).num_seconds();
    Cookie::build((state.config.cookie.name.clone(), signed))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::seconds(lifetime))
        .secure(state.config.cookie.secure)
        .build()
}

/// Expires the session cookie in the browser.
pub fn removal_cookie(state: &AppState) -> Cookie<'static> {
    Cookie::build((state.config.cookie.name.clone(), String::new()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::ZERO)
        .secure(state.config.cookie.secure)
        .build()
}

#[async_trait]
impl AuthorizationModule for CookieAuthorization {
    fn alias(&self) -> &str {
        COOKIE
    }

    /// Applies the cookie token, sliding its expiry.
    async fn try_ui(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        let Some(raw) = ctx.cookie else {
            return Ok(None);
        };
        let Some(plaintext) = ctx.state.signer.unsign(raw) else {
            tracing::warn!(ip = %ctx.ip, "Cookie signature mismatch");
            return Ok(None);
        };
        ctx.state
            .tokens
            .apply(&mut ctx.scope.tx, plaintext, TokenKind::Cookie)
            .await
    }
}
