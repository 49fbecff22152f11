use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::reconciler::{DigestKind, Mode, PosixNaming, PosixSettings};

#[derive(Debug, Clone)]
pub struct FacilityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
    pub tokens: TokenConfig,
    pub cookie: CookieConfig,
    pub throttle: ThrottleConfig,
    pub posix: PosixSettings,
    pub rate_limit: RateLimitConfig,
    pub request_timeout: Duration,
    pub external_timeout: Duration,
    /// Initial password of the `support` user; without it the user has none.
    pub support_password: Option<Secret<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `postgres://…`, or `memory://` for a throwaway in-process store.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Mail is logged instead of sent when unset.
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<Secret<String>>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub signer_secret: Secret<String>,
    pub allowed_hosts: Vec<String>,
    pub allowed_origins: Vec<String>,
    /// Base of links sent by mail.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub api_lifetime: chrono::Duration,
    pub cookie_lifetime: chrono::Duration,
    pub secret_bytes: usize,
    pub activation_code_lifetime: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub max_failures: i64,
    pub min_wait_seconds: i64,
    pub max_wait_seconds: i64,
    pub lifetime_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl Default for FacilityConfig {
    /// Development settings: in-memory store, host reconciliation off.
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "facility-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "memory://".to_string(),
                max_connections: 10,
                min_connections: 1,
            },
            smtp: SmtpConfig {
                host: None,
                port: 587,
                user: None,
                password: None,
                from: "facility@localhost".to_string(),
            },
            security: SecurityConfig {
                signer_secret: Secret::new("development-signer-secret".to_string()),
                allowed_hosts: vec!["*".to_string()],
                allowed_origins: vec!["http://localhost:3000".to_string()],
                public_url: "http://localhost:8080".to_string(),
            },
            tokens: TokenConfig {
                api_lifetime: chrono::Duration::hours(24),
                cookie_lifetime: chrono::Duration::hours(24),
                secret_bytes: 24,
                activation_code_lifetime: chrono::Duration::hours(48),
            },
            cookie: CookieConfig {
                name: "token".to_string(),
                secure: false,
            },
            throttle: ThrottleConfig {
                max_failures: 50,
                min_wait_seconds: 1,
                max_wait_seconds: 10,
                lifetime_seconds: 900,
            },
            posix: PosixSettings {
                mode: Mode::Disabled,
                synchronous: false,
                naming: PosixNaming {
                    name_limit: 32,
                    digest: DigestKind::Sha256,
                    home_base: "/home".to_string(),
                    project_base: "/srv/projects".to_string(),
                },
                shell: "/bin/bash".to_string(),
                command_timeout: Duration::from_secs(30),
            },
            rate_limit: RateLimitConfig {
                global_ip_limit: 100,
                global_ip_window_seconds: 60,
            },
            request_timeout: Duration::from_secs(30),
            external_timeout: Duration::from_secs(10),
            support_password: None,
        }
    }
}

impl FacilityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = Self::default();

        let environment: Environment = get_env("ENVIRONMENT", Some("dev"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let config = FacilityConfig {
            common,
            environment,
            service_name: get_env("SERVICE_NAME", Some("facility-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", Some("memory://"), is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            smtp: SmtpConfig {
                host: optional_env("SMTP_HOST"),
                port: parse_env("SMTP_PORT", "587")?,
                user: optional_env("SMTP_USER"),
                password: optional_env("SMTP_PASSWORD").map(Secret::new),
                from: get_env("SMTP_FROM", Some("facility@localhost"), is_prod)?,
            },
            security: SecurityConfig {
                signer_secret: Secret::new(get_env(
                    "SIGNER_SECRET",
                    Some("development-signer-secret"),
                    is_prod,
                )?),
                allowed_hosts: list_env("ALLOWED_HOSTS", if is_prod { None } else { Some("*") })?,
                allowed_origins: list_env("ALLOWED_ORIGINS", Some("http://localhost:3000"))?,
                public_url: get_env("PUBLIC_URL", Some("http://localhost:8080"), is_prod)?,
            },
            tokens: TokenConfig {
                api_lifetime: chrono::Duration::hours(parse_env("API_TOKEN_LIFETIME_HOURS", "24")?),
                cookie_lifetime: chrono::Duration::hours(parse_env("COOKIE_LIFETIME_HOURS", "24")?),
                secret_bytes: parse_env("TOKEN_SECRET_BYTES", "24")?,
                activation_code_lifetime: chrono::Duration::hours(parse_env(
                    "ACTIVATION_CODE_LIFETIME_HOURS",
                    "48",
                )?),
            },
            cookie: CookieConfig {
                name: get_env("COOKIE_NAME", Some("token"), false)?,
                secure: parse_env("COOKIE_SECURE", if is_prod { "true" } else { "false" })?,
            },
            throttle: ThrottleConfig {
                max_failures: parse_env("THROTTLE_MAX_FAILURES", "50")?,
                min_wait_seconds: parse_env("THROTTLE_MIN_WAIT_SECONDS", "1")?,
                max_wait_seconds: parse_env("THROTTLE_MAX_WAIT_SECONDS", "10")?,
                lifetime_seconds: parse_env("THROTTLE_LIFETIME_SECONDS", "900")?,
            },
            posix: PosixSettings {
                mode: parse_env("POSIX_MODE", "disabled")?,
                synchronous: parse_env("POSIX_SYNCHRONOUS", "false")?,
                naming: PosixNaming {
                    name_limit: parse_env("POSIX_NAME_LIMIT", "32")?,
                    digest: parse_env("POSIX_DIGEST", "sha256")?,
                    home_base: get_env("HOME_BASE_DIR", Some(&defaults.posix.naming.home_base), false)?,
                    project_base: get_env(
                        "PROJECT_BASE_DIR",
                        Some(&defaults.posix.naming.project_base),
                        false,
                    )?,
                },
                shell: get_env("POSIX_SHELL", Some("/bin/bash"), false)?,
                command_timeout: Duration::from_secs(parse_env("POSIX_COMMAND_TIMEOUT_SECONDS", "30")?),
            },
            rate_limit: RateLimitConfig {
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100")?,
                global_ip_window_seconds: parse_env("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", "60")?,
            },
            request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECONDS", "30")?),
            external_timeout: Duration::from_secs(parse_env("EXTERNAL_TIMEOUT_SECONDS", "10")?),
            support_password: optional_env("SUPPORT_PASSWORD").map(Secret::new),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }
        if self.tokens.api_lifetime <= chrono::Duration::zero()
            || self.tokens.cookie_lifetime <= chrono::Duration::zero()
        {
            return Err(config_error("Token lifetimes must be positive"));
        }
        if self.tokens.secret_bytes < 16 {
            return Err(config_error("TOKEN_SECRET_BYTES must be at least 16"));
        }
        if self.throttle.min_wait_seconds < 0
            || self.throttle.max_wait_seconds < self.throttle.min_wait_seconds
        {
            return Err(config_error(
                "THROTTLE_MAX_WAIT_SECONDS must not be below THROTTLE_MIN_WAIT_SECONDS",
            ));
        }
        if self.posix.naming.name_limit == 0 {
            return Err(config_error("POSIX_NAME_LIMIT must be positive"));
        }
        if self.cookie.name.is_empty() {
            return Err(config_error("COOKIE_NAME must not be empty"));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }
            if self.security.allowed_hosts.iter().any(|h| h == "*") {
                return Err(config_error("Wildcard ALLOWED_HOSTS not allowed in production"));
            }
            if self.database.url.starts_with("memory://") {
                return Err(config_error("In-memory database not allowed in production"));
            }
            if !self.cookie.secure {
                tracing::warn!("COOKIE_SECURE is off in production");
            }
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, required: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if required {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(default), false)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
    })
}

fn list_env(key: &str, default: Option<&str>) -> Result<Vec<String>, AppError> {
    Ok(get_env(key, default, false)?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FacilityConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cookie.name, "token");
        assert_eq!(config.throttle.max_failures, 50);
        assert_eq!(config.posix.mode, Mode::Disabled);
    }

    #[test]
    fn test_prod_rejects_wildcards_and_memory_store() {
        let mut config = FacilityConfig::default();
        config.environment = Environment::Prod;
        config.security.allowed_origins = vec!["https://facility.example.org".to_string()];
        assert!(config.validate().is_err());

        config.security.allowed_hosts = vec!["facility.example.org".to_string()];
        assert!(config.validate().is_err());

        config.database.url = "postgres://db/facility".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_throttle_bounds() {
        let mut config = FacilityConfig::default();
        config.throttle.max_wait_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
