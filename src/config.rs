//! Configuration types.

use crate::credential::{Credential, SelectionMode};
use crate::error::ConfigError;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How the selector picks credentials.
    pub mode: SelectionMode,
    /// Number of worker loops; defaults to one per credential.
    pub worker_count: Option<usize>,
    /// Concurrent executions allowed per credential.
    pub max_concurrent_per_credential: usize,
    /// Concurrent executions allowed across all credentials.
    pub max_total_concurrent: usize,
    /// Buffer size of each per-task event channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: SelectionMode::Random,
            worker_count: None,
            max_concurrent_per_credential: 1,
            max_total_concurrent: 3,
            event_capacity: 256,
        }
    }
}

impl QueueConfig {
    /// Load configuration and credentials from the environment.
    ///
    /// `TASKGATE_CREDENTIALS` is required: a JSON array of
    /// `{"key", "email", "password"}` objects. The knobs
    /// `TASKGATE_CREDENTIAL_MODE`, `TASKGATE_WORKER_COUNT`,
    /// `TASKGATE_MAX_CONCURRENT_PER_CREDENTIAL` and
    /// `TASKGATE_MAX_TOTAL_CONCURRENT` are optional.
    pub fn from_env() -> Result<(Self, Vec<Credential>), ConfigError> {
        let raw = std::env::var("TASKGATE_CREDENTIALS")
            .map_err(|_| ConfigError::MissingEnvVar("TASKGATE_CREDENTIALS".to_string()))?;
        let credentials: Vec<Credential> = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("TASKGATE_CREDENTIALS: {e}")))?;

        let mut config = Self::default();

        if let Ok(mode) = std::env::var("TASKGATE_CREDENTIAL_MODE") {
            config.mode = mode
                .parse()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "TASKGATE_CREDENTIAL_MODE".to_string(),
                    message,
                })?;
        }
        if let Some(count) = parse_env("TASKGATE_WORKER_COUNT")? {
            config.worker_count = Some(count);
        }
        if let Some(limit) = parse_env("TASKGATE_MAX_CONCURRENT_PER_CREDENTIAL")? {
            config.max_concurrent_per_credential = limit;
        }
        if let Some(limit) = parse_env("TASKGATE_MAX_TOTAL_CONCURRENT")? {
            config.max_total_concurrent = limit;
        }

        config.validate()?;
        Ok((config, credentials))
    }

    /// Reject zero-capacity settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("max_concurrent_per_credential", self.max_concurrent_per_credential),
            ("max_total_concurrent", self.max_total_concurrent),
            ("event_capacity", self.event_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if self.worker_count == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "worker_count".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env(key: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(None),
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Process environment is shared across the test binary; every from_env
    // test holds this lock while touching TASKGATE_* variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KNOBS: &[&str] = &[
        "TASKGATE_CREDENTIALS",
        "TASKGATE_CREDENTIAL_MODE",
        "TASKGATE_WORKER_COUNT",
        "TASKGATE_MAX_CONCURRENT_PER_CREDENTIAL",
        "TASKGATE_MAX_TOTAL_CONCURRENT",
    ];

    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for key in KNOBS {
            // SAFETY: single-threaded with respect to the environment; all
            // mutation happens under ENV_LOCK.
            unsafe { std::env::remove_var(key) };
        }
        for (key, value) in vars {
            unsafe { std::env::set_var(key, value) };
        }
        let out = f();
        for key in KNOBS {
            unsafe { std::env::remove_var(key) };
        }
        out
    }

    const CREDS_JSON: &str = r#"[{"key":"a","email":"a@x.com","password":"p1"}]"#;

    #[test]
    fn from_env_reads_credentials_and_knobs() {
        let (config, creds) = with_env(
            &[
                ("TASKGATE_CREDENTIALS", CREDS_JSON),
                ("TASKGATE_CREDENTIAL_MODE", "least_busy"),
                ("TASKGATE_WORKER_COUNT", "4"),
                ("TASKGATE_MAX_CONCURRENT_PER_CREDENTIAL", "2"),
                ("TASKGATE_MAX_TOTAL_CONCURRENT", "5"),
            ],
            QueueConfig::from_env,
        )
        .unwrap();

        assert_eq!(config.mode, SelectionMode::LeastBusy);
        assert_eq!(config.worker_count, Some(4));
        assert_eq!(config.max_concurrent_per_credential, 2);
        assert_eq!(config.max_total_concurrent, 5);
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].key, "a");
    }

    #[test]
    fn from_env_missing_credentials_is_reported() {
        let err = with_env(&[], QueueConfig::from_env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvVar(var) if var == "TASKGATE_CREDENTIALS"
        ));
    }

    #[test]
    fn from_env_malformed_credentials_json() {
        let err = with_env(
            &[("TASKGATE_CREDENTIALS", "not json")],
            QueueConfig::from_env,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ParseError(message) if message.starts_with("TASKGATE_CREDENTIALS")
        ));
    }

    #[test]
    fn from_env_unknown_mode_rejected() {
        let err = with_env(
            &[
                ("TASKGATE_CREDENTIALS", CREDS_JSON),
                ("TASKGATE_CREDENTIAL_MODE", "fastest"),
            ],
            QueueConfig::from_env,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key, .. } if key == "TASKGATE_CREDENTIAL_MODE"
        ));
    }

    #[test]
    fn from_env_non_numeric_knob_rejected() {
        let err = with_env(
            &[
                ("TASKGATE_CREDENTIALS", CREDS_JSON),
                ("TASKGATE_MAX_TOTAL_CONCURRENT", "many"),
            ],
            QueueConfig::from_env,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key, .. } if key == "TASKGATE_MAX_TOTAL_CONCURRENT"
        ));
    }

    #[test]
    fn defaults_match_upstream() {
        let config = QueueConfig::default();
        assert_eq!(config.mode, SelectionMode::Random);
        assert_eq!(config.max_concurrent_per_credential, 1);
        assert_eq!(config.max_total_concurrent, 3);
        assert!(config.worker_count.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_bounds_rejected() {
        let config = QueueConfig {
            max_total_concurrent: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "max_total_concurrent"
        ));

        let config = QueueConfig {
            worker_count: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn credentials_parse_from_json() {
        let creds: Vec<Credential> = serde_json::from_str(
            r#"[{"key":"a","email":"a@x.com","password":"p1"},
                {"key":"b","email":"b@x.com","password":"p2"}]"#,
        )
        .unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[1].key, "b");
    }
}
