//! Engine and registry configuration.
//!
//! [`EngineConfig`] holds the tunables of the search and rollover machinery.
//! Durations are written as humantime strings (`"500ms"`, `"5s"`).
//!
//! [`RegistryConfig`] is the on-disk format of the database registry:
//!
//! ```json
//! {
//!   "size_limit_bytes": 524288000,
//!   "current_index": 0,
//!   "backends": [
//!     { "id": 0, "kind": "postgres", "host": "db0", "database": "posts_0" },
//!     { "id": 1, "kind": "postgres", "host": "db1", "database": "posts_1" }
//!   ]
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::BackendDescriptor;

/// Environment variable overriding [`EngineConfig::sub_query_timeout`].
pub const ENV_SUB_QUERY_TIMEOUT: &str = "POSTVAULT_SUB_QUERY_TIMEOUT";
/// Environment variable overriding [`EngineConfig::search_timeout`].
pub const ENV_SEARCH_TIMEOUT: &str = "POSTVAULT_SEARCH_TIMEOUT";
/// Environment variable overriding [`EngineConfig::size_cache_ttl`].
pub const ENV_SIZE_CACHE_TTL: &str = "POSTVAULT_SIZE_CACHE_TTL";
/// Environment variable overriding [`EngineConfig::max_search_limit`].
pub const ENV_MAX_SEARCH_LIMIT: &str = "POSTVAULT_MAX_SEARCH_LIMIT";

/// Tunables for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for one backend's search sub-query.
    #[serde(with = "humantime_serde", default = "default_sub_query_timeout")]
    pub sub_query_timeout: Duration,

    /// Overall search deadline; unfinished sub-queries are cancelled.
    #[serde(with = "humantime_serde", default = "default_search_timeout")]
    pub search_timeout: Duration,

    /// How long a size measurement may be reused. Zero always measures.
    #[serde(with = "humantime_serde", default)]
    pub size_cache_ttl: Duration,

    /// Cap applied to the caller's search limit.
    #[serde(default = "default_max_search_limit")]
    pub max_search_limit: usize,
}

fn default_sub_query_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_search_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_search_limit() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sub_query_timeout: default_sub_query_timeout(),
            search_timeout: default_search_timeout(),
            size_cache_ttl: Duration::ZERO,
            max_search_limit: default_max_search_limit(),
        }
    }
}

impl EngineConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Reads overrides from the `POSTVAULT_*` environment variables.
    ///
    /// - `POSTVAULT_SUB_QUERY_TIMEOUT` (default: 5s)
    /// - `POSTVAULT_SEARCH_TIMEOUT` (default: 10s)
    /// - `POSTVAULT_SIZE_CACHE_TTL` (default: 0s)
    /// - `POSTVAULT_MAX_SEARCH_LIMIT` (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_SUB_QUERY_TIMEOUT) {
            config.sub_query_timeout = parse_duration_var(ENV_SUB_QUERY_TIMEOUT, &v)?;
        }
        if let Some(v) = lookup(ENV_SEARCH_TIMEOUT) {
            config.search_timeout = parse_duration_var(ENV_SEARCH_TIMEOUT, &v)?;
        }
        if let Some(v) = lookup(ENV_SIZE_CACHE_TTL) {
            config.size_cache_ttl = parse_duration_var(ENV_SIZE_CACHE_TTL, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_SEARCH_LIMIT) {
            config.max_search_limit =
                v.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        setting: ENV_MAX_SEARCH_LIMIT.to_string(),
                        message: e.to_string(),
                    })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero timeouts and a zero search limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sub_query_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                setting: "sub_query_timeout".to_string(),
            });
        }
        if self.search_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                setting: "search_timeout".to_string(),
            });
        }
        if self.max_search_limit == 0 {
            return Err(ConfigError::InvalidValue {
                setting: "max_search_limit".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_duration_var(setting: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        setting: setting.to_string(),
        message: e.to_string(),
    })
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Sets the per-backend sub-query timeout.
    pub fn sub_query_timeout(mut self, timeout: Duration) -> Self {
        self.config.sub_query_timeout = timeout;
        self
    }

    /// Sets the overall search deadline.
    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.config.search_timeout = timeout;
        self
    }

    /// Sets the size cache TTL.
    pub fn size_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.size_cache_ttl = ttl;
        self
    }

    /// Sets the search limit cap.
    pub fn max_search_limit(mut self, limit: usize) -> Self {
        self.config.max_search_limit = limit;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Durable registry file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Size ceiling applied to every backend, in bytes.
    pub size_limit_bytes: u64,

    /// Ordinal of the active backend. Equal to `backends.len()` once exhausted.
    #[serde(default)]
    pub current_index: usize,

    /// Registered backends in ordinal order.
    pub backends: Vec<BackendDescriptor>,
}

impl RegistryConfig {
    /// Creates a registry file with every descriptor active-eligible.
    pub fn new(size_limit_bytes: u64, backends: Vec<BackendDescriptor>) -> Self {
        Self {
            size_limit_bytes,
            current_index: 0,
            backends,
        }
    }

    /// Size ceiling in megabytes, a convenience for operators.
    pub fn with_size_limit_mb(mut self, megabytes: u64) -> Self {
        self.size_limit_bytes = megabytes * 1024 * 1024;
        self
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sub_query_timeout, Duration::from_secs(5));
        assert_eq!(config.search_timeout, Duration::from_secs(10));
        assert_eq!(config.size_cache_ttl, Duration::ZERO);
        assert_eq!(config.max_search_limit, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_humantime_json() {
        let json = r#"{"sub_query_timeout": "750ms", "size_cache_ttl": "2s"}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sub_query_timeout, Duration::from_millis(750));
        assert_eq!(config.size_cache_ttl, Duration::from_secs(2));
        assert_eq!(config.search_timeout, Duration::from_secs(10));

        let out = serde_json::to_value(&config).unwrap();
        assert_eq!(out["sub_query_timeout"], "750ms");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_SUB_QUERY_TIMEOUT, "1s"),
            (ENV_MAX_SEARCH_LIMIT, "250"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.sub_query_timeout, Duration::from_secs(1));
        assert_eq!(config.max_search_limit, 250);
        assert_eq!(config.search_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(|k| {
            (k == ENV_SEARCH_TIMEOUT).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref setting, .. } if setting == ENV_SEARCH_TIMEOUT));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = EngineConfig::builder()
            .sub_query_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroDuration {
                setting: "sub_query_timeout".to_string()
            }
        );

        assert!(EngineConfig::builder().max_search_limit(0).build().is_err());
    }

    #[test]
    fn test_registry_config_size_limit_mb() {
        let config = RegistryConfig::new(0, vec![]).with_size_limit_mb(500);
        assert_eq!(config.size_limit_bytes, 500 * 1024 * 1024);
    }
}
