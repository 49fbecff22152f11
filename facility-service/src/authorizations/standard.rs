use async_trait::async_trait;

use super::{AuthContext, AuthorizationModule, STANDARD};
use crate::models::User;
use crate::services::ServiceError;
use crate::utils::password::{verify_against_dummy, Password};

/// Login and password.
pub struct StandardAuthorization;

#[async_trait]
impl AuthorizationModule for StandardAuthorization {
    fn alias(&self) -> &str {
        STANDARD
    }

    async fn try_api(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        let (Some(login), Some(password)) = (ctx.credential("login"), ctx.credential("password"))
        else {
            return Ok(None);
        };
        let password = Password::new(password.to_string());

        let candidate = User::find_by_login(&mut ctx.scope.tx, login).await?;
        let user_id = candidate.as_ref().map(User::id);

        ctx.state
            .throttler
            .check(&mut ctx.scope.tx, ctx.ip, user_id)
            .await?;

        let verified = match candidate {
            Some(user) if user.has_password() => user.verify_password(&password).then_some(user),
            _ => {
                verify_against_dummy(&password);
                None
            }
        };
        match verified {
            Some(user) if !user.is_locked() => Ok(Some(user)),
            Some(user) => {
                tracing::warn!(user_id = user.id(), "Locked user attempted to log in");
                ctx.state.throttler.record_failure(ctx.scope, ctx.ip, user_id);
                Ok(None)
            }
            None => {
                tracing::warn!(ip = %ctx.ip, login = %login, "Invalid credentials");
                ctx.state.throttler.record_failure(ctx.scope, ctx.ip, user_id);
                Ok(None)
            }
        }
    }
}
