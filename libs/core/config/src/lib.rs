//! Environment-driven configuration shared by the postbox binaries.
//!
//! Every setting is read from environment variables. Binaries call
//! [`tracing::init_tracing`] first, then load the typed configs they need
//! through [`FromEnv`].

pub mod database;
pub mod redis;
pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Invalid value for '{key}': {details}")]
    Invalid { key: String, details: String },
}

/// Application environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Name and version of the running binary, for health endpoints and startup logs.
#[derive(Clone, Debug)]
pub struct AppInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// Build an [`AppInfo`] from the calling crate's Cargo metadata.
#[macro_export]
macro_rules! app_info {
    () => {
        $crate::AppInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    };
}

/// Helper to load environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an environment variable, falling back to `default` when it is unset.
///
/// A variable that is set but unparsable is an error rather than a silent default.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Read a comma-separated list, dropping empty items.
pub fn env_list(key: &str, default: &str) -> Vec<String> {
    env_or_default(key, default)
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });

        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("POSTBOX_TEST_VAR", Some("test_value"), || {
            assert_eq!(env_or_default("POSTBOX_TEST_VAR", "default"), "test_value");
        });

        temp_env::with_var_unset("POSTBOX_MISSING_VAR", || {
            assert_eq!(env_or_default("POSTBOX_MISSING_VAR", "default"), "default");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("POSTBOX_MISSING_REQUIRED", || {
            let err = env_required("POSTBOX_MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("POSTBOX_MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_parse() {
        temp_env::with_var("POSTBOX_RETRIES", Some(" 7 "), || {
            assert_eq!(env_parse::<u32>("POSTBOX_RETRIES", 3).unwrap(), 7);
        });

        temp_env::with_var_unset("POSTBOX_RETRIES", || {
            assert_eq!(env_parse::<u32>("POSTBOX_RETRIES", 3).unwrap(), 3);
        });

        temp_env::with_var("POSTBOX_RETRIES", Some("many"), || {
            let err = env_parse::<u32>("POSTBOX_RETRIES", 3).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "POSTBOX_RETRIES"));
        });
    }

    #[test]
    fn test_env_list() {
        temp_env::with_var("POSTBOX_DOMAINS", Some("example.org, ,mail.example.org"), || {
            assert_eq!(
                env_list("POSTBOX_DOMAINS", ""),
                vec!["example.org".to_string(), "mail.example.org".to_string()]
            );
        });
    }

    #[test]
    fn test_app_info_macro() {
        let info = app_info!();
        assert_eq!(info.name, "core_config");
        assert!(!info.version.is_empty());
    }
}
