use serde::{Deserialize, Serialize};
use validator::Validate;

use super::users::UserResponse;

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordRecoveryRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}
