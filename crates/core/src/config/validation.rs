//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `primary_page` does not start with `/`
    /// - any timeout is below 100ms or above 10 minutes
    /// - `path_poll_interval_ms` is 0 or not below `path_timeout_ms`
    /// - `queue_capacity` is 0
    ///
    /// Returns `ConfigError::Missing` if `cache_dir` or `settings_path` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "cache_dir".into(),
                hint: "Set NOMAD_GW_CACHE_DIR environment variable".into(),
            });
        }
        if self.settings_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "settings_path".into(),
                hint: "Set NOMAD_GW_SETTINGS_PATH environment variable".into(),
            });
        }

        if !self.primary_page.starts_with('/') {
            return Err(ConfigError::Invalid { field: "primary_page".into(), reason: "must start with '/'".into() });
        }

        for (field, value) in [
            ("page_timeout_ms", self.page_timeout_ms),
            ("file_timeout_ms", self.file_timeout_ms),
            ("ping_timeout_ms", self.ping_timeout_ms),
            ("path_timeout_ms", self.path_timeout_ms),
        ] {
            if value < 100 {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be at least 100ms".into() });
            }
            if value > 600_000 {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: "must not exceed 10 minutes (600000ms)".into(),
                });
            }
        }

        if self.path_poll_interval_ms == 0 || self.path_poll_interval_ms >= self.path_timeout_ms {
            return Err(ConfigError::Invalid {
                field: "path_poll_interval_ms".into(),
                reason: "must be greater than 0 and below path_timeout_ms".into(),
            });
        }

        if self.worker_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_poll_interval_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid { field: "queue_capacity".into(), reason: "must be greater than 0".into() });
        }

        if self.file_timeout_ms < self.page_timeout_ms {
            tracing::warn!(
                file_timeout_ms = self.file_timeout_ms,
                page_timeout_ms = self.page_timeout_ms,
                "file_timeout_ms is shorter than page_timeout_ms; large downloads may time out"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_cache_dir() {
        let config = AppConfig { cache_dir: PathBuf::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Missing { field, .. }) if field == "cache_dir"));
    }

    #[test]
    fn test_validate_relative_primary_page() {
        let config = AppConfig { primary_page: "page/index.mu".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "primary_page"));
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { ping_timeout_ms: 50, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "ping_timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_exceeds_limit() {
        let config = AppConfig { file_timeout_ms: 601_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "file_timeout_ms"));
    }

    #[test]
    fn test_validate_poll_interval_not_below_budget() {
        let config = AppConfig { path_poll_interval_ms: 30_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "path_poll_interval_ms"));
    }

    #[test]
    fn test_validate_zero_queue_capacity() {
        let config = AppConfig { queue_capacity: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "queue_capacity"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig {
            page_timeout_ms: 100,
            file_timeout_ms: 100,
            ping_timeout_ms: 100,
            path_timeout_ms: 100,
            path_poll_interval_ms: 99,
            queue_capacity: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
