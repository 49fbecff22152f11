//! Bearer tokens shared by the API header and the UI cookie.
//!
//! The client holds `"<id>:<secret>"`; the server keeps only
//! `sha256$<salt-hex>$<digest-hex>` of the secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::ServiceError;
use crate::config::TokenConfig;
use crate::models::{Token, TokenKind, User};
use crate::store::{Query, Tx};

const SCHEME: &str = "sha256";
const SALT_BYTES: usize = 16;

/// Plaintext handed out exactly once, at issue.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Token,
    pub plaintext: String,
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    secret_bytes: usize,
    api_lifetime: Duration,
    cookie_lifetime: Duration,
}

impl TokenStore {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            secret_bytes: config.secret_bytes,
            api_lifetime: config.api_lifetime,
            cookie_lifetime: config.cookie_lifetime,
        }
    }

    pub fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Api => self.api_lifetime,
            TokenKind::Cookie => self.cookie_lifetime,
        }
    }

    /// Sweeps every expired token, then stores a fresh one for `user`.
    pub async fn issue(&self, tx: &mut Tx, user: &User, kind: TokenKind) -> Result<IssuedToken, ServiceError> {
        let now = Utc::now();
        let swept = tx
            .delete_where::<Token>(Query::new().lt("expires_at", now))
            .await?;
        if swept > 0 {
            tracing::debug!(count = swept, "Expired tokens removed");
        }

        let mut secret = vec![0u8; self.secret_bytes];
        OsRng.fill_bytes(&mut secret);
        let secret = URL_SAFE_NO_PAD.encode(secret);

        let mut token = Token {
            id: 0,
            user_id: user.id(),
            kind,
            token_hash: hash_secret(&secret),
            expires_at: now + self.lifetime(kind),
        };
        tx.insert(&mut token).await?;

        tracing::info!(user_id = user.id(), kind = kind.as_str(), token_id = token.id, "Token issued");
        let plaintext = format!("{}:{}", token.id, secret);
        Ok(IssuedToken { token, plaintext })
    }

    /// Resolves a presented token to its user and slides its expiry.
    ///
    /// `None` for malformed, unknown, expired or mismatching tokens and for
    /// locked users.
    pub async fn apply(&self, tx: &mut Tx, plaintext: &str, kind: TokenKind) -> Result<Option<User>, ServiceError> {
        let Some(mut token) = self.load_verified(tx, plaintext, kind).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        if token.is_expired(now) {
            tracing::debug!(token_id = token.id, "Token expired");
            return Ok(None);
        }

        let Some(user) = tx.find::<User>(token.user_id).await? else {
            return Ok(None);
        };
        if user.is_locked() {
            tracing::info!(user_id = user.id(), "Token of locked user rejected");
            return Ok(None);
        }

        token.expires_at = now + self.lifetime(kind);
        tx.update(&token).await?;
        Ok(Some(user))
    }

    /// Deletes the token. Returns whether a matching token existed.
    pub async fn revoke(&self, tx: &mut Tx, plaintext: &str, kind: TokenKind) -> Result<bool, ServiceError> {
        let Some(token) = self.load_verified(tx, plaintext, kind).await? else {
            return Ok(false);
        };
        tx.delete::<Token>(token.id).await?;
        tracing::info!(user_id = token.user_id, token_id = token.id, "Token revoked");
        Ok(true)
    }

    async fn load_verified(&self, tx: &mut Tx, plaintext: &str, kind: TokenKind) -> Result<Option<Token>, ServiceError> {
        let Some((id, secret)) = split_plaintext(plaintext) else {
            return Ok(None);
        };
        let token = tx
            .find_one::<Token>(
                Query::new()
                    .eq("id", id)
                    .eq("kind", kind.as_str())
                    .for_update(),
            )
            .await?;
        Ok(token.filter(|t| verify_secret(secret, &t.token_hash)))
    }
}

fn split_plaintext(plaintext: &str) -> Option<(i64, &str)> {
    let (id, secret) = plaintext.trim().split_once(':')?;
    let id = id.parse::<i64>().ok().filter(|id| *id > 0)?;
    if secret.is_empty() {
        return None;
    }
    Some((id, secret))
}

fn digest(salt: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    format!("{}${}${}", SCHEME, hex::encode(salt), digest(&salt, secret))
}

pub(crate) fn verify_secret(secret: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(SCHEME), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(salt) = hex::decode(salt) else {
        return false;
    };
    let actual = digest(&salt, secret);
    actual.len() == expected.len() && bool::from(actual.as_bytes().ct_eq(expected.as_bytes()))
}
