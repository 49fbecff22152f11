//! Idempotent first-start seeding: access levels, authorization module
//! descriptors and the `support` user.

use secrecy::ExposeSecret;

use crate::authorizations::{AUTOMATIC, BEARER, COOKIE, OAUTH, PASSWORD_RECOVERY, STANDARD};
use crate::models::{AccessLevel, AccessLevelRecord, ModuleDescriptor, User, AUTHORIZATIONS};
use crate::pipeline::RequestScope;
use crate::reconciler::Mode;
use crate::services::ServiceError;
use crate::store::{Query, Tx};
use crate::utils::password::Password;
use crate::AppState;

pub const SUPPORT_LOGIN: &str = "support";

/// `(alias, position, enabled)` of the modules installed on first start.
const DEFAULT_MODULES: &[(&str, i64, bool)] = &[
    (STANDARD, 0, true),
    (AUTOMATIC, 1, true),
    (PASSWORD_RECOVERY, 2, true),
    (COOKIE, 3, true),
    (OAUTH, 4, false),
    (BEARER, 5, false),
];

async fn seed_access_levels(tx: &mut Tx) -> Result<usize, ServiceError> {
    let mut created = 0;
    for level in AccessLevel::ALL {
        if tx
            .find_by::<AccessLevelRecord>("alias", level.alias())
            .await?
            .is_none()
        {
            let mut record = AccessLevelRecord::from(level);
            tx.insert(&mut record).await?;
            created += 1;
        }
    }
    Ok(created)
}

async fn seed_modules(tx: &mut Tx) -> Result<usize, ServiceError> {
    let mut created = 0;
    for &(alias, position, enabled) in DEFAULT_MODULES {
        if ModuleDescriptor::find_by_alias(tx, alias).await?.is_some() {
            continue;
        }
        let mut module = ModuleDescriptor::new(alias, AUTHORIZATIONS, position)?;
        module.set_enabled(enabled);
        module.create(tx).await?;
        created += 1;
    }
    Ok(created)
}

async fn ensure_support_user(scope: &mut RequestScope, password: Option<Password>) -> Result<bool, ServiceError> {
    let existing = scope
        .tx
        .count::<User>(Query::new().eq("is_support", true))
        .await?;
    if existing > 0 {
        return Ok(false);
    }

    let mut support = User::new(SUPPORT_LOGIN)?;
    support.set_superuser(true);
    support.set_support(true);
    match password {
        Some(password) => support.set_password(&password)?,
        None => tracing::warn!("No SUPPORT_PASSWORD configured; support user has no password"),
    }
    support.create(scope).await?;
    Ok(true)
}

/// Brings an empty database to a usable state. Safe to run on every start.
pub async fn run(state: &AppState) -> Result<(), ServiceError> {
    let password = match &state.config.support_password {
        Some(secret) => Some(Password::new(secret.expose_secret().clone())),
        None if !state.config.is_prod() => Some(Password::new(SUPPORT_LOGIN.to_string())),
        None => None,
    };

    let tx = state.store.begin().await?;
    let projector = state.reconciler.open("bootstrap")?;
    let mut scope = RequestScope::new(tx, projector);

    let levels = seed_access_levels(&mut scope.tx).await?;
    let modules = seed_modules(&mut scope.tx).await?;
    let support = ensure_support_user(&mut scope, password).await?;

    let (tx, projector) = scope.into_parts();
    let commands = projector.take_commands();
    match projector.mode() {
        Mode::Active if !commands.is_empty() => {
            if let Err(e) = state.reconciler.execute(&commands).await {
                tx.rollback().await?;
                return Err(e.into());
            }
        }
        Mode::Suggest => {
            for command in &commands {
                tracing::warn!(command = %command.render(), "Host change pending operator action");
            }
        }
        _ => {}
    }
    tx.commit().await?;

    tracing::info!(
        access_levels = levels,
        modules,
        support_created = support,
        "Bootstrap complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_modules_are_ordered_and_unique() {
        let positions: Vec<i64> = DEFAULT_MODULES.iter().map(|m| m.1).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_external_modules_start_disabled() {
        for (alias, _, enabled) in DEFAULT_MODULES {
            if *alias == OAUTH || *alias == BEARER {
                assert!(!enabled);
            }
        }
    }
}
