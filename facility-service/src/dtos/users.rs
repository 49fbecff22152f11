use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{ExternalAccount, User};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserResponse {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub is_locked: bool,
    pub is_superuser: bool,
    pub is_support: bool,
    pub has_password: bool,
    pub unix_group: Option<String>,
    pub home_dir: Option<String>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id(),
            login: user.login().to_string(),
            name: user.name().map(str::to_string),
            surname: user.surname().map(str::to_string),
            email: user.email().map(str::to_string),
            phone: user.phone().map(str::to_string),
            avatar: user.avatar().map(str::to_string),
            is_locked: user.is_locked(),
            is_superuser: user.is_superuser(),
            is_support: user.is_support(),
            has_password: user.has_password(),
            unix_group: user.unix_group().map(str::to_string),
            home_dir: user.home_dir().map(str::to_string),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    pub login: Option<String>,
    #[validate(length(min = 1, max = 256, message = "Password must be 1 to 256 characters"))]
    pub password: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    pub login: Option<String>,
    #[validate(length(min = 1, max = 256, message = "Password must be 1 to 256 characters"))]
    pub password: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub is_locked: Option<bool>,
    pub is_superuser: Option<bool>,
    pub unix_group: Option<String>,
    pub home_dir: Option<String>,
}

/// Profile edits; the caller cannot change their own flags.
#[derive(Debug, Deserialize, Validate)]
pub struct ProfileUpdateRequest {
    #[validate(length(min = 1, max = 256, message = "Password must be 1 to 256 characters"))]
    pub password: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
}

impl From<ProfileUpdateRequest> for UpdateUserRequest {
    fn from(req: ProfileUpdateRequest) -> Self {
        Self {
            password: req.password,
            name: req.name,
            surname: req.surname,
            email: req.email,
            phone: req.phone,
            avatar: req.avatar,
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PasswordResetResponse {
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateExternalAccountRequest {
    #[validate(length(min = 1, message = "Provider is required"))]
    pub provider: String,
    #[validate(length(min = 1, message = "Account key is required"))]
    pub account_key: String,
}

#[derive(Debug, Serialize)]
pub struct ExternalAccountResponse {
    pub id: i64,
    pub provider: String,
    pub account_key: String,
}

impl From<&ExternalAccount> for ExternalAccountResponse {
    fn from(account: &ExternalAccount) -> Self {
        Self {
            id: account.id,
            provider: account.provider.clone(),
            account_key: account.account_key.clone(),
        }
    }
}
