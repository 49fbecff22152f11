//! Services shared by the authorization modules and the handlers.

pub mod access;
mod email;
pub mod error;
pub mod metrics;
mod throttle;
mod tokens;

pub use email::{EmailProvider, EmailService, MockEmailService, SentEmail};
pub use error::ServiceError;
pub use throttle::Throttler;
pub use tokens::{IssuedToken, TokenStore};
pub(crate) use tokens::{hash_secret, verify_secret};
