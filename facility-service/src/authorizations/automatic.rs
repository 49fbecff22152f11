use async_trait::async_trait;

use super::{AuthContext, AuthorizationModule, AUTOMATIC, COOKIE};
use crate::models::User;
use crate::services::ServiceError;
use crate::store::{Direction, Query};

/// Signs everyone in as the support user while no real authenticator is
/// enabled. The cookie transport does not count as one.
pub struct AutomaticAuthorization;

impl AutomaticAuthorization {
    pub fn applies(enabled: &[String]) -> bool {
        !enabled
            .iter()
            .any(|alias| alias != AUTOMATIC && alias != COOKIE)
    }
}

#[async_trait]
impl AuthorizationModule for AutomaticAuthorization {
    fn alias(&self) -> &str {
        AUTOMATIC
    }

    fn is_passive(&self) -> bool {
        true
    }

    async fn try_api(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        if !Self::applies(ctx.enabled) {
            return Ok(None);
        }
        let support = ctx
            .scope
            .tx
            .find_one::<User>(
                Query::new()
                    .eq("is_support", true)
                    .order_by("id", Direction::Asc),
            )
            .await?;
        Ok(support.filter(|user| !user.is_locked()))
    }

    async fn try_ui(&self, ctx: &mut AuthContext<'_>) -> Result<Option<User>, ServiceError> {
        self.try_api(ctx).await
    }
}
