use std::collections::BTreeSet;

use super::ServiceError;
use crate::models::{AccessLevel, Group, Permission, Project, User};
use crate::pipeline::RequestScope;

/// Level of a caller on a project, given what is known about them.
///
/// Superusers and root-group members get `full`; everyone else the most
/// permissive of `levels`, or `no_access` when there are none.
pub fn effective_level(
    is_superuser: bool,
    in_root_group: bool,
    levels: impl IntoIterator<Item = AccessLevel>,
) -> AccessLevel {
    if is_superuser || in_root_group {
        return AccessLevel::Full;
    }
    AccessLevel::most_permissive(levels)
}

/// Resolves `user`'s level on `project`, caching the answer for the rest of
/// the request.
pub async fn resolve(scope: &mut RequestScope, user: &User, project: &Project) -> Result<AccessLevel, ServiceError> {
    if let Some(level) = scope.cached_access(user.id(), project.id()) {
        return Ok(level);
    }

    let level = if user.is_superuser() {
        AccessLevel::Full
    } else {
        let groups: BTreeSet<i64> = Group::ids_of_user(&mut scope.tx, user.id())
            .await?
            .into_iter()
            .collect();
        let in_root = groups.contains(&project.root_group_id());
        let levels = if in_root {
            Vec::new()
        } else {
            Permission::list(&mut scope.tx, project.id())
                .await?
                .into_iter()
                .filter(|p| groups.contains(&p.group_id()))
                .map(|p| p.level())
                .collect()
        };
        effective_level(false, in_root, levels)
    };

    tracing::debug!(user_id = user.id(), project_id = project.id(), level = level.alias(), "Access resolved");
    scope.cache_access(user.id(), project.id(), level);
    Ok(level)
}

/// Like [`resolve`] but fails unless the level permits `required`.
///
/// A caller without any access gets `EntityNotFound`, hiding that the
/// project exists.
pub async fn require(
    scope: &mut RequestScope,
    user: &User,
    project: &Project,
    required: AccessLevel,
) -> Result<AccessLevel, ServiceError> {
    let level = resolve(scope, user, project).await?;
    if level == AccessLevel::NoAccess {
        return Err(ServiceError::not_found(format!("Project {}", project.alias())));
    }
    if !level.permits(required) {
        return Err(ServiceError::PermissionDenied);
    }
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superuser_and_root_get_full() {
        assert_eq!(effective_level(true, false, []), AccessLevel::Full);
        assert_eq!(
            effective_level(false, true, [AccessLevel::DataView]),
            AccessLevel::Full
        );
    }

    #[test]
    fn test_most_permissive_wins() {
        assert_eq!(
            effective_level(
                false,
                false,
                [AccessLevel::DataView, AccessLevel::DataAdd, AccessLevel::NoAccess]
            ),
            AccessLevel::DataAdd
        );
    }

    #[test]
    fn test_no_permissions_is_no_access() {
        assert_eq!(effective_level(false, false, []), AccessLevel::NoAccess);
    }

    #[test]
    fn test_adding_a_permission_never_lowers_the_level() {
        for base in AccessLevel::ALL {
            for extra in AccessLevel::ALL {
                let before = effective_level(false, false, [base]);
                let after = effective_level(false, false, [base, extra]);
                assert!(after.rank() <= before.rank());
            }
        }
    }
}
