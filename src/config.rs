use crate::error::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Extra headers attached to every probe request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    pub api_key_env: Option<String>,
    pub bearer_token_env: Option<String>,
}

fn default_api_key_header() -> String {
    "apikey".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UniquenessPolicy {
    /// Drop a new tick while one is still running for the same identity.
    Keep,
    /// Abort the running tick and start the new one.
    Replace,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_identity")]
    pub identity: String,
    pub interval_secs: u64,
    #[serde(default = "default_policy")]
    pub policy: UniquenessPolicy,
    #[serde(default = "default_retry_initial")]
    pub retry_initial_backoff_secs: u64,
    #[serde(default = "default_retry_max")]
    pub retry_max_backoff_secs: u64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter_percent: u8,
}

fn default_identity() -> String {
    "api-health".to_string()
}

fn default_policy() -> UniquenessPolicy {
    UniquenessPolicy::Keep
}

fn default_retry_initial() -> u64 {
    30
}

fn default_retry_max() -> u64 {
    900
}

fn default_retry_jitter() -> u8 {
    10
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectivityMode {
    Tcp,
    AssumeOnline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_connectivity_mode")]
    pub mode: ConnectivityMode,
    #[serde(default = "default_connectivity_timeout")]
    pub timeout_ms: u64,
}

fn default_connectivity_mode() -> ConnectivityMode {
    ConnectivityMode::Tcp
}

fn default_connectivity_timeout() -> u64 {
    3000
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            mode: default_connectivity_mode(),
            timeout_ms: default_connectivity_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub probe: ProbeConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
}

impl AppConfig {
    pub fn load_default() -> anyhow::Result<Self> {
        let default = include_str!("../config/default.toml");
        Ok(Self::from_toml(default)?)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let p = path.into();
        let s = fs::read_to_string(&p)?;
        Ok(Self::from_toml(&s)?)
    }

    pub fn from_toml(s: &str) -> ConfigResult<Self> {
        let cfg: AppConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject zero durations and an inverted backoff range; url and header
    /// checks happen when the probe target is built.
    pub fn validate(&self) -> ConfigResult<()> {
        let checks = [
            ("probe.connect_timeout_ms", self.probe.connect_timeout_ms),
            ("probe.read_timeout_ms", self.probe.read_timeout_ms),
            ("schedule.interval_secs", self.schedule.interval_secs),
            (
                "schedule.retry_initial_backoff_secs",
                self.schedule.retry_initial_backoff_secs,
            ),
            (
                "schedule.retry_max_backoff_secs",
                self.schedule.retry_max_backoff_secs,
            ),
            ("connectivity.timeout_ms", self.connectivity.timeout_ms),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field });
            }
        }
        if self.schedule.retry_max_backoff_secs < self.schedule.retry_initial_backoff_secs {
            return Err(ConfigError::BackoffRange {
                initial: self.schedule.retry_initial_backoff_secs,
                max: self.schedule.retry_max_backoff_secs,
            });
        }
        Ok(())
    }

    /// Read an optional credential from the environment.
    pub fn credential_from_env(var: Option<&str>) -> Option<String> {
        let var = var?;
        match std::env::var(var) {
            Ok(v) if !v.is_empty() => Some(v),
            _ => {
                tracing::warn!(env = var, "credential env var not set, header skipped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [probe]
        url = "https://api.example.com/health"
        connect_timeout_ms = 5000
        read_timeout_ms = 10000

        [schedule]
        interval_secs = 900
    "#;

    #[test]
    fn test_default_config_loads() {
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.schedule.interval_secs, 900);
        assert_eq!(cfg.schedule.policy, UniquenessPolicy::Keep);
        assert_eq!(cfg.connectivity.mode, ConnectivityMode::Tcp);
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let cfg = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.probe.api_key_header, "apikey");
        assert!(cfg.probe.headers.is_empty());
        assert_eq!(cfg.schedule.identity, "api-health");
        assert_eq!(cfg.schedule.retry_initial_backoff_secs, 30);
        assert_eq!(cfg.connectivity.timeout_ms, 3000);
    }

    #[test]
    fn test_headers_and_replace_policy() {
        let s = r#"
            [probe]
            url = "https://api.example.com/health"
            connect_timeout_ms = 5000
            read_timeout_ms = 10000
            [probe.headers]
            "x-client" = "poller"

            [schedule]
            interval_secs = 60
            policy = "replace"

            [connectivity]
            mode = "assume-online"
        "#;
        let cfg = AppConfig::from_toml(s).unwrap();
        assert_eq!(cfg.probe.headers.get("x-client").map(String::as_str), Some("poller"));
        assert_eq!(cfg.schedule.policy, UniquenessPolicy::Replace);
        assert_eq!(cfg.connectivity.mode, ConnectivityMode::AssumeOnline);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let s = MINIMAL.replace("read_timeout_ms = 10000", "read_timeout_ms = 0");
        let err = AppConfig::from_toml(&s).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ZeroValue { field: "probe.read_timeout_ms" }
        ));
    }

    #[test]
    fn test_zero_max_backoff_rejected() {
        let s = MINIMAL.replace(
            "interval_secs = 900",
            "interval_secs = 900\nretry_max_backoff_secs = 0",
        );
        let err = AppConfig::from_toml(&s).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ZeroValue { field: "schedule.retry_max_backoff_secs" }
        ));
    }

    #[test]
    fn test_max_backoff_below_initial_rejected() {
        let s = MINIMAL.replace(
            "interval_secs = 900",
            "interval_secs = 900\nretry_initial_backoff_secs = 60\nretry_max_backoff_secs = 10",
        );
        let err = AppConfig::from_toml(&s).unwrap_err();
        assert!(matches!(err, ConfigError::BackoffRange { initial: 60, max: 10 }));
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(MINIMAL.as_bytes())?;
        let cfg = AppConfig::load_from(file.path())?;
        assert_eq!(cfg.probe.read_timeout_ms, 10000);
        Ok(())
    }

    #[test]
    fn test_missing_credential_env_is_skipped() {
        assert_eq!(
            AppConfig::credential_from_env(Some("HEALTH_POLLER_TEST_UNSET_VAR")),
            None
        );
        assert_eq!(AppConfig::credential_from_env(None), None);
    }
}
