//! Runtime settings loaded from environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable prefix for all settings.
const ENV_PREFIX: &str = "SCRIBA_";

/// Application settings controlling job lifecycle, the sweeper and the
/// result cache. Every field has a sensible default so a bare environment
/// yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Promotes the default log filter from `info` to `debug`.
    pub debug: bool,
    /// How long terminal job records are kept before eviction.
    pub job_retention_secs: u64,
    /// Interval between retention sweeper cycles.
    pub sweep_interval_secs: u64,
    /// How long a job may sit in `cancelling` before the sweeper
    /// force-cancels it and resets its slot.
    pub cancel_grace_secs: u64,
    /// Credential for remote transcription engines. Remote models are
    /// unavailable when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_api_key: Option<String>,
    /// TTL for cached transcription results.
    pub cache_ttl_secs: u64,
    /// Maximum number of cached transcription results.
    pub cache_capacity: u64,
    /// Worker slots per model when the catalog does not specify a count.
    pub default_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            job_retention_secs: 3600,
            sweep_interval_secs: 300,
            cancel_grace_secs: 60,
            cloud_api_key: None,
            cache_ttl_secs: 3600 * 24,
            cache_capacity: 256,
            default_workers: default_worker_count(),
        }
    }
}

/// Half the logical cores, clamped to [1, 2].
fn default_worker_count() -> usize {
    (num_cpus::get() / 2).clamp(1, 2)
}

fn parse_var<T: std::str::FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: raw,
        reason: e.to_string(),
    })
}

fn env_u64(suffix: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(format!("{ENV_PREFIX}{suffix}")) {
        Ok(raw) => parse_var(suffix, raw),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Loads settings from `SCRIBA_*` environment variables, falling back to
    /// defaults for anything unset. Validates before returning.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let debug = match env::var(format!("{ENV_PREFIX}DEBUG")) {
            Ok(raw) => matches!(raw.as_str(), "1" | "true" | "yes"),
            Err(_) => defaults.debug,
        };

        let cloud_api_key = env::var(format!("{ENV_PREFIX}CLOUD_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        let default_workers = match env::var(format!("{ENV_PREFIX}DEFAULT_WORKERS")) {
            Ok(raw) => parse_var("DEFAULT_WORKERS", raw)?,
            Err(_) => defaults.default_workers,
        };

        let settings = Self {
            debug,
            job_retention_secs: env_u64("JOB_RETENTION_SECS", defaults.job_retention_secs)?,
            sweep_interval_secs: env_u64("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            cancel_grace_secs: env_u64("CANCEL_GRACE_SECS", defaults.cancel_grace_secs)?,
            cloud_api_key,
            cache_ttl_secs: env_u64("CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            cache_capacity: env_u64("CACHE_CAPACITY", defaults.cache_capacity)?,
            default_workers,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values that would make the sweeper or the pool degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "sweep interval must be at least one second".to_string(),
            });
        }
        if self.default_workers == 0 {
            return Err(ConfigError::Validation {
                message: "default worker count must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for suffix in [
            "DEBUG",
            "JOB_RETENTION_SECS",
            "SWEEP_INTERVAL_SECS",
            "CANCEL_GRACE_SECS",
            "CLOUD_API_KEY",
            "CACHE_TTL_SECS",
            "CACHE_CAPACITY",
            "DEFAULT_WORKERS",
        ] {
            env::remove_var(format!("{ENV_PREFIX}{suffix}"));
        }
    }

    #[test]
    #[serial]
    fn defaults_when_env_empty() {
        clear_env();
        let settings = Settings::from_env().unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.job_retention_secs, 3600);
        assert_eq!(settings.sweep_interval_secs, 300);
        assert!(settings.cloud_api_key.is_none());
        assert!(settings.default_workers >= 1);
    }

    #[test]
    #[serial]
    fn reads_overrides_from_env() {
        clear_env();
        env::set_var("SCRIBA_DEBUG", "true");
        env::set_var("SCRIBA_JOB_RETENTION_SECS", "120");
        env::set_var("SCRIBA_CLOUD_API_KEY", "key-123");
        let settings = Settings::from_env().unwrap();
        assert!(settings.debug);
        assert_eq!(settings.job_retention_secs, 120);
        assert_eq!(settings.cloud_api_key.as_deref(), Some("key-123"));
        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_unparseable_value() {
        clear_env();
        env::set_var("SCRIBA_SWEEP_INTERVAL_SECS", "soon");
        let err = Settings::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        clear_env();
    }

    #[test]
    #[serial]
    fn blank_api_key_counts_as_unset() {
        clear_env();
        env::set_var("SCRIBA_CLOUD_API_KEY", "   ");
        let settings = Settings::from_env().unwrap();
        assert!(settings.cloud_api_key.is_none());
        clear_env();
    }

    #[test]
    fn zero_sweep_interval_fails_validation() {
        let settings = Settings {
            sweep_interval_secs: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
