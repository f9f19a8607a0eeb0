//! Supervisor configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! max_attempts = 3
//! busy_policy = "reject"
//! session_ttl_secs = 600
//!
//! [outliers]
//! rule = { method = "iqr", k = 1.5 }
//! policy = "drop"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tabedit_ops::{OutlierPolicy, OutlierRule};

/// What to do when a thread already has a turn in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the running turn to finish
    #[default]
    Queue,
    /// Fail immediately with `ThreadBusy`
    Reject,
}

/// Explicit outlier settings used when a request names neither
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierDefaults {
    pub rule: OutlierRule,
    pub policy: OutlierPolicy,
}

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Interpretation attempts per turn, including the first
    pub max_attempts: u32,
    /// Behaviour for concurrent turns on one thread
    pub busy_policy: BusyPolicy,
    /// Idle time before a thread's session is dropped
    pub session_ttl_secs: u64,
    /// Maximum live sessions
    pub max_sessions: u64,
    /// Table versions retained per thread
    pub snapshot_limit: usize,
    /// Whole-turn timeout; `None` waits indefinitely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_timeout_secs: Option<u64>,
    /// Outlier rule and policy when the request gives none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outliers: Option<OutlierDefaults>,
}

impl SupervisorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With attempt limit
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// With busy policy
    #[inline]
    #[must_use]
    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    /// With session idle TTL
    #[inline]
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl_secs = ttl.as_secs();
        self
    }

    /// With snapshot history length
    #[inline]
    #[must_use]
    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = limit;
        self
    }

    /// With whole-turn timeout, rounded up to whole seconds
    #[inline]
    #[must_use]
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.turn_timeout_secs = Some(secs);
        self
    }

    /// With outlier defaults
    #[inline]
    #[must_use]
    pub fn with_outliers(mut self, rule: OutlierRule, policy: OutlierPolicy) -> Self {
        self.outliers = Some(OutlierDefaults { rule, policy });
        self
    }

    /// Session TTL as a duration
    #[inline]
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Turn timeout as a duration
    #[inline]
    #[must_use]
    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_secs.map(Duration::from_secs)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns `ConfigError` for malformed TOML or invalid values
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check values are usable
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be at least 1".to_string()));
        }
        if self.turn_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("turn_timeout_secs must be at least 1".to_string()));
        }
        if self.snapshot_limit == 0 {
            return Err(ConfigError::Invalid("snapshot_limit must be at least 1".to_string()));
        }
        if let Some(outliers) = &self.outliers {
            let k = outliers.rule.k();
            if !k.is_finite() || k < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "outliers.rule.k must be a non-negative number, got {k}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            busy_policy: BusyPolicy::Queue,
            session_ttl_secs: 1800,
            max_sessions: 10_000,
            snapshot_limit: 20,
            turn_timeout_secs: None,
            outliers: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = SupervisorConfig::new();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.busy_policy, BusyPolicy::Queue);
        assert_eq!(config.session_ttl(), Duration::from_secs(1800));
        assert!(config.turn_timeout().is_none());
        assert!(config.outliers.is_none());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(SupervisorConfig::from_toml_str("").unwrap(), SupervisorConfig::default());
    }

    #[test]
    fn toml_with_outliers() {
        let config = SupervisorConfig::from_toml_str(
            r#"
            max_attempts = 5
            busy_policy = "reject"
            turn_timeout_secs = 30

            [outliers]
            rule = { method = "std_dev", k = 2.0 }
            policy = "cap"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.busy_policy, BusyPolicy::Reject);
        assert_eq!(config.turn_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.outliers,
            Some(OutlierDefaults {
                rule: OutlierRule::StdDev { k: 2.0 },
                policy: OutlierPolicy::Cap,
            })
        );
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = SupervisorConfig::from_toml_str("max_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "snapshot_limit = 4").unwrap();
        let config = SupervisorConfig::load(file.path()).unwrap();
        assert_eq!(config.snapshot_limit, 4);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SupervisorConfig::load("/nonexistent/tabedit.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tabedit.toml"));
    }

    #[test]
    fn builder_methods() {
        let config = SupervisorConfig::new()
            .with_max_attempts(1)
            .with_busy_policy(BusyPolicy::Reject)
            .with_turn_timeout(Duration::from_secs(2))
            .with_outliers(OutlierRule::Iqr { k: 1.5 }, OutlierPolicy::Drop);
        assert!(config.validate().is_ok());
        assert_eq!(config.turn_timeout_secs, Some(2));
    }

    #[test]
    fn sub_second_timeout_rounds_up() {
        let config = SupervisorConfig::new().with_turn_timeout(Duration::from_millis(250));
        assert_eq!(config.turn_timeout(), Some(Duration::from_secs(1)));
        let config = SupervisorConfig::new().with_turn_timeout(Duration::from_millis(2500));
        assert_eq!(config.turn_timeout_secs, Some(3));
        assert!(matches!(
            SupervisorConfig::from_toml_str("turn_timeout_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
