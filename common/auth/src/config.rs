use std::env;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_SIGN_IN_PATH: &str = "/login";
const DEFAULT_HOME_PATH: &str = "/";
const DEFAULT_REGISTRY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Runtime configuration for the session store and route guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Where anonymous visitors are sent by the authenticated-only guard.
    pub sign_in_path: String,
    /// Where authenticated non-admins are sent by the admin guard.
    pub home_path: String,
    /// Base URL of the backend user registry.
    pub registry_url: String,
    pub registry_timeout: Duration,
    /// Base URL of the identity provider REST API, when one is used.
    pub identity_url: Option<String>,
    pub identity_api_key: Option<String>,
}

impl SessionConfig {
    /// Construct config with the portal's default paths and a 5 second registry timeout.
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            home_path: DEFAULT_HOME_PATH.to_string(),
            registry_url: registry_url.into(),
            registry_timeout: Duration::from_millis(DEFAULT_REGISTRY_TIMEOUT_MS),
            identity_url: None,
            identity_api_key: None,
        }
    }

    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    pub fn with_home_path(mut self, path: impl Into<String>) -> Self {
        self.home_path = path.into();
        self
    }

    pub fn with_registry_timeout(mut self, timeout: Duration) -> Self {
        self.registry_timeout = timeout;
        self
    }

    pub fn with_identity(mut self, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.identity_url = Some(url.into());
        self.identity_api_key = Some(api_key.into());
        self
    }

    /// Load configuration from `PORTAL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));

        let registry_url = read("PORTAL_REGISTRY_URL").ok_or(ConfigError::Missing {
            key: "PORTAL_REGISTRY_URL",
        })?;
        let mut config = Self::new(registry_url);

        if let Some(path) = read("PORTAL_SIGN_IN_PATH") {
            config.sign_in_path = parse_path("PORTAL_SIGN_IN_PATH", path)?;
        }
        if let Some(path) = read("PORTAL_HOME_PATH") {
            config.home_path = parse_path("PORTAL_HOME_PATH", path)?;
        }
        if let Some(raw) = read("PORTAL_REGISTRY_TIMEOUT_MS") {
            let millis = raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: "PORTAL_REGISTRY_TIMEOUT_MS",
                value: raw.clone(),
                reason: "expected a whole number of milliseconds",
            })?;
            config.registry_timeout = Duration::from_millis(millis);
        }

        config.identity_url = read("PORTAL_IDENTITY_URL");
        config.identity_api_key = read("PORTAL_IDENTITY_API_KEY");
        if config.identity_url.is_some() && config.identity_api_key.is_none() {
            return Err(ConfigError::Missing {
                key: "PORTAL_IDENTITY_API_KEY",
            });
        }

        Ok(config)
    }
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_path(key: &'static str, value: String) -> Result<String, ConfigError> {
    if value.starts_with('/') {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value,
            reason: "paths must start with '/'",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_registry_is_set() {
        let config =
            SessionConfig::from_lookup(lookup(&[("PORTAL_REGISTRY_URL", "http://api.local")]))
                .expect("config");
        assert_eq!(config.sign_in_path, "/login");
        assert_eq!(config.home_path, "/");
        assert_eq!(config.registry_timeout, Duration::from_secs(5));
        assert!(config.identity_url.is_none());
    }

    #[test]
    fn registry_url_is_required() {
        let err = SessionConfig::from_lookup(lookup(&[("PORTAL_REGISTRY_URL", "   ")]))
            .expect_err("blank url");
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "PORTAL_REGISTRY_URL"
            }
        );
    }

    #[test]
    fn overrides_are_validated() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("PORTAL_REGISTRY_URL", "http://api.local"),
            ("PORTAL_SIGN_IN_PATH", "/auth/sign-in"),
            ("PORTAL_REGISTRY_TIMEOUT_MS", "250"),
            ("PORTAL_IDENTITY_URL", "http://id.local"),
            ("PORTAL_IDENTITY_API_KEY", "key"),
        ]))
        .expect("config");
        assert_eq!(config.sign_in_path, "/auth/sign-in");
        assert_eq!(config.registry_timeout, Duration::from_millis(250));
        assert_eq!(config.identity_api_key.as_deref(), Some("key"));

        let err = SessionConfig::from_lookup(lookup(&[
            ("PORTAL_REGISTRY_URL", "http://api.local"),
            ("PORTAL_HOME_PATH", "home"),
        ]))
        .expect_err("relative path");
        assert!(matches!(err, ConfigError::Invalid { key: "PORTAL_HOME_PATH", .. }));
    }

    #[test]
    fn identity_url_needs_api_key() {
        let err = SessionConfig::from_lookup(lookup(&[
            ("PORTAL_REGISTRY_URL", "http://api.local"),
            ("PORTAL_IDENTITY_URL", "http://id.local"),
        ]))
        .expect_err("missing key");
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "PORTAL_IDENTITY_API_KEY"
            }
        );
    }
}
