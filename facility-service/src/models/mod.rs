//! Entity layer: plain values persisted through a [`crate::store::Tx`] and
//! projected onto the host through a [`crate::reconciler::Projector`].

pub mod access_level;
pub mod external;
pub mod failed_authorization;
pub mod fields;
pub mod group;
pub mod module;
pub mod permission;
pub mod project;
pub mod token;
pub mod user;

pub use access_level::{AccessLevel, AccessLevelRecord};
pub use external::{ExternalAccount, ExternalSession};
pub use failed_authorization::FailedAuthorization;
pub use fields::EntityState;
pub use group::{Group, GroupMember};
pub use module::{ModuleDescriptor, AUTHORIZATIONS};
pub use permission::Permission;
pub use project::Project;
pub use token::{Token, TokenKind};
pub use user::User;

use crate::store::TableSchema;

/// Every table, referenced tables before the tables referencing them.
pub static TABLES: &[&TableSchema] = &[
    &access_level::ACCESS_LEVELS,
    &user::USERS,
    &group::GROUPS,
    &group::GROUP_USERS,
    &project::PROJECTS,
    &permission::PERMISSIONS,
    &token::TOKENS,
    &failed_authorization::FAILED_AUTHORIZATIONS,
    &external::EXTERNAL_ACCOUNTS,
    &external::EXTERNAL_SESSIONS,
    &module::MODULES,
];
