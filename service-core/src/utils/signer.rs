use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = '.';

/// Appends an HMAC-SHA256 tag to a value so it can round-trip through an
/// untrusted client, e.g. a cookie.
///
/// Signed form: `value "." base64url(HMAC(secret, value))`.
#[derive(Clone)]
pub struct Signer {
    mac: Arc<HmacSha256>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(secret: Secret<String>) -> Result<Self, anyhow::Error> {
        let mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid signer key: {}", e))?;
        Ok(Self { mac: Arc::new(mac) })
    }

    fn tag(&self, value: &str) -> Vec<u8> {
        let mut mac = HmacSha256::clone(&self.mac);
        mac.update(value.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    pub fn sign(&self, value: &str) -> String {
        format!("{}{}{}", value, SEPARATOR, URL_SAFE_NO_PAD.encode(self.tag(value)))
    }

    /// Returns the original value if the tag matches, compared in constant time.
    pub fn unsign<'a>(&self, signed: &'a str) -> Option<&'a str> {
        let (value, tag) = signed.rsplit_once(SEPARATOR)?;
        let provided = URL_SAFE_NO_PAD.decode(tag).ok()?;
        let expected = self.tag(value);

        if provided.len() != expected.len() {
            return None;
        }

        if bool::from(expected.ct_eq(&provided)) {
            Some(value)
        } else {
            None
        }
    }
}
