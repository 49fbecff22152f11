//! HTTP handlers of the `/api/v1` surface.

pub mod auth;
pub mod groups;
pub mod host;
pub mod metrics;
pub mod modules;
pub mod profile;
pub mod projects;
pub mod users;
