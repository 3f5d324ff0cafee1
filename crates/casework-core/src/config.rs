// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Casework engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the job executor polls for due jobs
    pub job_poll_interval: Duration,
    /// Maximum jobs processed per poll
    pub job_batch_size: i64,
    /// Delay before a batch status-check timer job first fires (and between re-checks)
    pub batch_status_check_interval: Duration,
    /// Whether a case instance may migrate to a definition deployed in the default tenant
    pub default_tenant_fallback: bool,
    /// The tenant id treated as the default tenant
    pub default_tenant_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_poll_interval: Duration::from_millis(500),
            job_batch_size: 10,
            batch_status_check_interval: Duration::from_secs(5),
            default_tenant_fallback: false,
            default_tenant_id: String::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional (with defaults):
    /// - `CASEWORK_JOB_POLL_INTERVAL_MS`: job executor poll interval (default: 500)
    /// - `CASEWORK_JOB_BATCH_SIZE`: max jobs per poll (default: 10)
    /// - `CASEWORK_BATCH_STATUS_CHECK_INTERVAL_MS`: batch status check delay (default: 5000)
    /// - `CASEWORK_DEFAULT_TENANT_FALLBACK`: `true`/`false` (default: false)
    /// - `CASEWORK_DEFAULT_TENANT_ID`: default tenant id (default: empty)
    pub fn from_env() -> Result<Self, ConfigError> {
        let job_poll_interval_ms: u64 = std::env::var("CASEWORK_JOB_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CASEWORK_JOB_POLL_INTERVAL_MS", "must be milliseconds")
            })?;

        let job_batch_size: i64 = std::env::var("CASEWORK_JOB_BATCH_SIZE")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CASEWORK_JOB_BATCH_SIZE", "must be a positive integer")
            })?;
        if job_batch_size <= 0 {
            return Err(ConfigError::Invalid(
                "CASEWORK_JOB_BATCH_SIZE",
                "must be a positive integer",
            ));
        }

        let batch_status_check_interval_ms: u64 =
            std::env::var("CASEWORK_BATCH_STATUS_CHECK_INTERVAL_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "CASEWORK_BATCH_STATUS_CHECK_INTERVAL_MS",
                        "must be milliseconds",
                    )
                })?;

        let default_tenant_fallback: bool = std::env::var("CASEWORK_DEFAULT_TENANT_FALLBACK")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CASEWORK_DEFAULT_TENANT_FALLBACK", "must be true or false")
            })?;

        let default_tenant_id =
            std::env::var("CASEWORK_DEFAULT_TENANT_ID").unwrap_or_default();

        Ok(Self {
            job_poll_interval: Duration::from_millis(job_poll_interval_ms),
            job_batch_size,
            batch_status_check_interval: Duration::from_millis(batch_status_check_interval_ms),
            default_tenant_fallback,
            default_tenant_id,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("CASEWORK_JOB_POLL_INTERVAL_MS");
        guard.remove("CASEWORK_JOB_BATCH_SIZE");
        guard.remove("CASEWORK_BATCH_STATUS_CHECK_INTERVAL_MS");
        guard.remove("CASEWORK_DEFAULT_TENANT_FALLBACK");
        guard.remove("CASEWORK_DEFAULT_TENANT_ID");

        let config = EngineConfig::from_env().unwrap();

        assert_eq!(config.job_poll_interval, Duration::from_millis(500));
        assert_eq!(config.job_batch_size, 10);
        assert_eq!(config.batch_status_check_interval, Duration::from_secs(5));
        assert!(!config.default_tenant_fallback);
        assert_eq!(config.default_tenant_id, "");
    }

    #[test]
    fn test_config_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("CASEWORK_JOB_POLL_INTERVAL_MS", "50");
        guard.set("CASEWORK_JOB_BATCH_SIZE", "25");
        guard.set("CASEWORK_BATCH_STATUS_CHECK_INTERVAL_MS", "100");
        guard.set("CASEWORK_DEFAULT_TENANT_FALLBACK", "true");
        guard.set("CASEWORK_DEFAULT_TENANT_ID", "acme");

        let config = EngineConfig::from_env().unwrap();

        assert_eq!(config.job_poll_interval, Duration::from_millis(50));
        assert_eq!(config.job_batch_size, 25);
        assert_eq!(
            config.batch_status_check_interval,
            Duration::from_millis(100)
        );
        assert!(config.default_tenant_fallback);
        assert_eq!(config.default_tenant_id, "acme");
    }

    #[test]
    fn test_config_invalid_batch_size() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("CASEWORK_JOB_BATCH_SIZE", "zero");

        let result = EngineConfig::from_env();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::Invalid("CASEWORK_JOB_BATCH_SIZE", _)
        ));
    }

    #[test]
    fn test_config_non_positive_batch_size() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("CASEWORK_JOB_BATCH_SIZE", "0");

        let result = EngineConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_invalid_fallback_flag() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("CASEWORK_JOB_BATCH_SIZE");
        guard.set("CASEWORK_DEFAULT_TENANT_FALLBACK", "yes");

        let result = EngineConfig::from_env();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::Invalid("CASEWORK_DEFAULT_TENANT_FALLBACK", _)
        ));
    }
}
