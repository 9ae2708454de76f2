use std::env;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_DB_URL: &str = "sqlite://exam.sqlite3";
pub const DEFAULT_TICK_MS: u64 = 200;
pub const DEFAULT_CHECKPOINT_EVERY_SECS: u64 = 30;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Connection details for the remote authority.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    /// Upper bound for one HTTP request, connect to last body byte.
    pub request_timeout: Duration,
}

impl RemoteConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            request_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }
}

/// Runtime settings, read from `EXAM_*` environment variables.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub remote: RemoteConfig,
    pub db_url: String,
    /// Scheduler granularity for countdown ticks.
    pub tick_interval: Duration,
    /// Countdown seconds between two checkpoints.
    pub checkpoint_every_secs: u64,
}

impl RuntimeConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when `EXAM_API_BASE_URL` is unset and
    /// `ConfigError::Invalid` for unparsable numbers.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(None)
    }

    /// Like [`RuntimeConfig::from_env`], but `base_url` (e.g. from a CLI flag)
    /// takes precedence over `EXAM_API_BASE_URL`.
    ///
    /// # Errors
    ///
    /// See [`RuntimeConfig::from_env`].
    pub fn from_env_with(base_url: Option<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(base_url, |var| env::var(var).ok())
    }

    /// Build the config from `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// See [`RuntimeConfig::from_env`].
    pub fn from_lookup(
        base_url: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = base_url
            .or_else(|| lookup("EXAM_API_BASE_URL"))
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("EXAM_API_BASE_URL"))?;
        let api_token = lookup("EXAM_API_TOKEN").filter(|v| !v.trim().is_empty());
        let tick_ms = parse_var(&lookup, "EXAM_TICK_MS", DEFAULT_TICK_MS)?;
        let checkpoint_every_secs = parse_var(
            &lookup,
            "EXAM_CHECKPOINT_EVERY_SECS",
            DEFAULT_CHECKPOINT_EVERY_SECS,
        )?;
        let timeout_ms = parse_var(&lookup, "EXAM_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)?;

        Ok(Self {
            remote: RemoteConfig {
                base_url,
                api_token,
                request_timeout: Duration::from_millis(timeout_ms.max(1)),
            },
            db_url: db_url_from(&lookup),
            tick_interval: Duration::from_millis(tick_ms.max(1)),
            checkpoint_every_secs: checkpoint_every_secs.max(1),
        })
    }

    /// Database URL alone, for commands that never talk to the remote
    /// authority.
    #[must_use]
    pub fn db_url_from_env() -> String {
        db_url_from(&|var: &str| env::var(var).ok())
    }

    #[must_use]
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            remote,
            db_url: DEFAULT_DB_URL.into(),
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            checkpoint_every_secs: DEFAULT_CHECKPOINT_EVERY_SECS,
        }
    }
}

fn db_url_from(lookup: &impl Fn(&str) -> Option<String>) -> String {
    lookup("EXAM_DB_URL")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DB_URL.into())
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn defaults_are_sensible() {
        let config = RuntimeConfig::new(RemoteConfig::new("http://localhost:8080"));
        assert_eq!(config.tick_interval, Duration::from_millis(200));
        assert_eq!(config.checkpoint_every_secs, 30);
        assert_eq!(config.remote.request_timeout, Duration::from_secs(10));
        assert!(config.remote.api_token.is_none());
    }

    #[test]
    fn explicit_base_url_wins() {
        let lookup = vars(&[("EXAM_API_BASE_URL", "http://env.test")]);
        let config =
            RuntimeConfig::from_lookup(Some("http://override.test".into()), lookup).unwrap();
        assert_eq!(config.remote.base_url, "http://override.test");
    }

    #[test]
    fn blank_base_url_is_missing() {
        let lookup = vars(&[("EXAM_API_BASE_URL", "  ")]);
        let err = RuntimeConfig::from_lookup(Some("   ".into()), lookup).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("EXAM_API_BASE_URL")));
    }

    #[test]
    fn reads_every_variable() {
        let lookup = vars(&[
            ("EXAM_API_BASE_URL", "http://env.test"),
            ("EXAM_API_TOKEN", "secret"),
            ("EXAM_DB_URL", "sqlite::memory:"),
            ("EXAM_TICK_MS", "50"),
            ("EXAM_CHECKPOINT_EVERY_SECS", "0"),
            ("EXAM_HTTP_TIMEOUT_MS", "2500"),
        ]);
        let config = RuntimeConfig::from_lookup(None, lookup).unwrap();

        assert_eq!(config.remote.base_url, "http://env.test");
        assert_eq!(config.remote.api_token.as_deref(), Some("secret"));
        assert_eq!(config.remote.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.db_url, "sqlite::memory:");
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.checkpoint_every_secs, 1);
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let lookup = vars(&[("EXAM_API_BASE_URL", "http://env.test")]);
        let config = RuntimeConfig::from_lookup(None, lookup).unwrap();

        assert!(config.remote.api_token.is_none());
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert_eq!(config.checkpoint_every_secs, DEFAULT_CHECKPOINT_EVERY_SECS);
    }

    #[test]
    fn db_url_needs_no_remote_settings() {
        assert_eq!(db_url_from(&vars(&[])), DEFAULT_DB_URL);
        let lookup = vars(&[("EXAM_DB_URL", "sqlite://local.db")]);
        assert_eq!(db_url_from(&lookup), "sqlite://local.db");
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let lookup = vars(&[
            ("EXAM_API_BASE_URL", "http://env.test"),
            ("EXAM_HTTP_TIMEOUT_MS", "soon"),
        ]);
        let err = RuntimeConfig::from_lookup(None, lookup).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "EXAM_HTTP_TIMEOUT_MS", .. }
        ));
    }
}
