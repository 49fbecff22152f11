use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    AuthorizationModule, AutomaticAuthorization, CookieAuthorization, ExternalAuthorization,
    ExternalFlavor, HttpProvider, PasswordRecovery, StandardAuthorization, AUTOMATIC, BEARER,
    COOKIE, OAUTH, PASSWORD_RECOVERY, STANDARD,
};
use crate::models::ModuleDescriptor;
use crate::services::ServiceError;

/// Builds a module instance from a descriptor's settings snapshot.
pub type ModuleFactory =
    Box<dyn Fn(&ModuleDescriptor) -> Result<Box<dyn AuthorizationModule>, ServiceError> + Send + Sync>;

/// Alias → factory table. Filled at start-up, shared read-only afterwards.
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Every built-in module. External modules talk HTTP with the given
    /// per-call timeout.
    pub fn with_defaults(public_url: &str, external_timeout: Duration) -> Self {
        let public_url = public_url.trim_end_matches('/').to_string();
        let oauth_url = public_url.clone();

        Self::new()
            .register(STANDARD, |_| Ok(Box::new(StandardAuthorization)))
            .register(AUTOMATIC, |_| Ok(Box::new(AutomaticAuthorization)))
            .register(PASSWORD_RECOVERY, |_| Ok(Box::new(PasswordRecovery)))
            .register(COOKIE, |_| Ok(Box::new(CookieAuthorization)))
            .register(OAUTH, move |descriptor| {
                let provider = HttpProvider::from_descriptor(descriptor, &oauth_url, external_timeout)?;
                Ok(Box::new(ExternalAuthorization::new(
                    descriptor.alias(),
                    ExternalFlavor::OAuth,
                    Arc::new(provider),
                )))
            })
            .register(BEARER, move |descriptor| {
                let provider = HttpProvider::from_descriptor(descriptor, &public_url, external_timeout)?;
                Ok(Box::new(ExternalAuthorization::new(
                    descriptor.alias(),
                    ExternalFlavor::Bearer,
                    Arc::new(provider),
                )))
            })
    }

    /// Adds or replaces the factory of `alias`.
    pub fn register<F>(mut self, alias: &str, factory: F) -> Self
    where
        F: Fn(&ModuleDescriptor) -> Result<Box<dyn AuthorizationModule>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(alias.to_string(), Box::new(factory));
        self
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.factories.contains_key(alias)
    }

    /// `None` when no factory is registered for the descriptor's alias.
    pub fn build(&self, descriptor: &ModuleDescriptor) -> Result<Option<Box<dyn AuthorizationModule>>, ServiceError> {
        self.factories
            .get(descriptor.alias())
            .map(|factory| factory(descriptor))
            .transpose()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AUTHORIZATIONS;

    #[test]
    fn test_defaults_cover_builtin_modules() {
        let registry = ModuleRegistry::with_defaults("http://localhost:8080", Duration::from_secs(1));
        for alias in [STANDARD, AUTOMATIC, PASSWORD_RECOVERY, COOKIE, OAUTH, BEARER] {
            assert!(registry.contains(alias), "{} missing", alias);
        }
    }

    #[test]
    fn test_unknown_alias_builds_nothing() {
        let registry = ModuleRegistry::with_defaults("http://localhost:8080", Duration::from_secs(1));
        let descriptor = ModuleDescriptor::new("ldap", AUTHORIZATIONS, 9).unwrap();
        assert!(registry.build(&descriptor).unwrap().is_none());
    }

    #[test]
    fn test_builtin_builds_with_its_alias() {
        let registry = ModuleRegistry::with_defaults("http://localhost:8080", Duration::from_secs(1));
        let descriptor = ModuleDescriptor::new(STANDARD, AUTHORIZATIONS, 0).unwrap();
        let module = registry.build(&descriptor).unwrap().unwrap();
        assert_eq!(module.alias(), STANDARD);
        assert!(!module.is_passive());
    }
}
