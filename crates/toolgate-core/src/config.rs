//! Governance configuration: TOML file, then environment overrides.
//!
//! ```toml
//! [breaker]
//! trip_threshold = 5
//! cool_down_ms = 30000
//!
//! [execution]
//! backoff_base_ms = 500
//! max_backoff_ms = 10000
//!
//! [url_policy]
//! allowed_schemes = ["https"]
//! allowed_domains = ["*.example.com"]
//!
//! [registry]
//! unconfigured = "allow"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::registry::{ToolRegistry, UnconfiguredPolicy};
use crate::safety::UrlPolicy;
use crate::sandbox::{BreakerConfig, ExecutionConfig};

pub const ENV_BREAKER_THRESHOLD: &str = "TOOLGATE_BREAKER_THRESHOLD";
pub const ENV_BREAKER_COOL_DOWN_MS: &str = "TOOLGATE_BREAKER_COOL_DOWN_MS";
pub const ENV_BACKOFF_BASE_MS: &str = "TOOLGATE_BACKOFF_BASE_MS";
pub const ENV_UNCONFIGURED_POLICY: &str = "TOOLGATE_UNCONFIGURED_POLICY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub unconfigured: UnconfiguredPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub breaker: BreakerConfig,
    pub execution: ExecutionConfig,
    pub url_policy: UrlPolicy,
    pub registry: RegistryConfig,
}

impl GovernanceConfig {
    /// Parse and validate. Missing sections take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, see [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `TOOLGATE_*` environment variables, then re-validate.
    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with a
    /// custom variable lookup.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_BREAKER_THRESHOLD) {
            self.breaker.trip_threshold = parse_env(ENV_BREAKER_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(ENV_BREAKER_COOL_DOWN_MS) {
            self.breaker.cool_down_ms = parse_env(ENV_BREAKER_COOL_DOWN_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_BACKOFF_BASE_MS) {
            self.execution.backoff_base_ms = parse_env(ENV_BACKOFF_BASE_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_UNCONFIGURED_POLICY) {
            self.registry.unconfigured = match v.trim().to_ascii_lowercase().as_str() {
                "allow" => UnconfiguredPolicy::Allow,
                "deny" => UnconfiguredPolicy::Deny,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: ENV_UNCONFIGURED_POLICY,
                        value: v,
                    })
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings the breaker and backoff cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.trip_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.trip_threshold must be at least 1".into(),
            ));
        }
        if self.url_policy.allowed_schemes.is_empty() {
            return Err(ConfigError::Invalid(
                "url_policy.allowed_schemes must not be empty".into(),
            ));
        }
        if self.execution.max_backoff_ms < self.execution.backoff_base_ms {
            return Err(ConfigError::Invalid(format!(
                "execution.max_backoff_ms ({}) is below backoff_base_ms ({})",
                self.execution.max_backoff_ms, self.execution.backoff_base_ms
            )));
        }
        Ok(())
    }

    /// An empty registry honouring `[registry]`.
    pub fn new_registry(&self) -> ToolRegistry {
        ToolRegistry::new().with_unconfigured_policy(self.registry.unconfigured)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = GovernanceConfig::default();
        assert_eq!(cfg.breaker.trip_threshold, 5);
        assert_eq!(cfg.breaker.cool_down_ms, 30_000);
        assert_eq!(cfg.registry.unconfigured, UnconfiguredPolicy::Allow);
        assert!(cfg.url_policy.allowed_schemes.contains("https"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = GovernanceConfig::from_toml_str(
            r#"
            [breaker]
            trip_threshold = 3

            [registry]
            unconfigured = "deny"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.breaker.trip_threshold, 3);
        assert_eq!(cfg.breaker.cool_down_ms, 30_000);
        assert_eq!(cfg.execution.backoff_base_ms, 500);
        assert_eq!(cfg.registry.unconfigured, UnconfiguredPolicy::Deny);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(matches!(
            GovernanceConfig::from_toml_str("[breaker]\ntrip_threshold = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            GovernanceConfig::from_toml_str("[url_policy]\nallowed_schemes = []"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            GovernanceConfig::from_toml_str(
                "[execution]\nbackoff_base_ms = 2000\nmax_backoff_ms = 100"
            ),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            GovernanceConfig::from_toml_str("[breaker\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_BREAKER_THRESHOLD, "7"),
            (ENV_BREAKER_COOL_DOWN_MS, "1500"),
            (ENV_UNCONFIGURED_POLICY, "Deny"),
        ]);
        let cfg = GovernanceConfig::default()
            .apply_overrides(|var| vars.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.breaker.trip_threshold, 7);
        assert_eq!(cfg.breaker.cool_down_ms, 1_500);
        assert_eq!(cfg.registry.unconfigured, UnconfiguredPolicy::Deny);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let err = GovernanceConfig::default()
            .apply_overrides(|var| (var == ENV_BACKOFF_BASE_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: ENV_BACKOFF_BASE_MS,
                ..
            }
        ));
    }
}
