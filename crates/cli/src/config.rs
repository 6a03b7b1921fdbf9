//! Operator configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level config, loaded from JSON. Every section has workable defaults
/// except the endpoints the operator must point somewhere real.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SnagConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Directory for snapshots, envelopes, keys, and record sinks.
    /// Defaults to the platform data dir.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CatalogConfig {
    pub endpoint: String,
    pub location: String,
    #[serde(default = "default_radius")]
    pub radius: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8700/graphql".into(),
            location: String::new(),
            radius: default_radius(),
            page_size: default_page_size(),
            page_delay_ms: default_page_delay_ms(),
            max_pages: default_max_pages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionConfig {
    /// Endpoint of the browser-driver sidecar service.
    pub driver_endpoint: String,
    pub username: String,
    /// Password; falls back to the `SNAG_PASSWORD` environment variable.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_code_window_secs")]
    pub code_window_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver_endpoint: "http://127.0.0.1:8710".into(),
            username: String::new(),
            password: None,
            code_window_secs: default_code_window_secs(),
        }
    }
}

impl SessionConfig {
    /// Resolves the login password from config or environment.
    pub fn resolve_password(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        std::env::var("SNAG_PASSWORD")
            .context("no session password: set session.password or SNAG_PASSWORD")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SolverConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8720".into(),
            api_key: None,
            poll_ms: default_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MailboxConfig {
    pub endpoint: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8730/codes".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotifyConfig {
    /// Webhook receiving one JSON posting per notification. Unset means
    /// notifications are logged only.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClaimConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
        }
    }
}

fn default_radius() -> u32 {
    40
}
fn default_page_size() -> u64 {
    100
}
fn default_page_delay_ms() -> u64 {
    750
}
fn default_max_pages() -> u32 {
    50
}
fn default_code_window_secs() -> u64 {
    120
}
fn default_poll_ms() -> u64 {
    2_000
}
fn default_workers() -> usize {
    4
}
fn default_concurrency() -> usize {
    2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_lock_ttl_secs() -> u64 {
    1_800
}
fn default_cycle_interval_secs() -> u64 {
    300
}

impl SnagConfig {
    /// Loads config from `path`, or the default location when absent. A
    /// missing default file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        match std::fs::read_to_string(&resolved) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("invalid config at {}", resolved.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && path.is_none() => {
                Ok(Self::default())
            }
            Err(err) => {
                Err(anyhow::Error::from(err)
                    .context(format!("cannot read config at {}", resolved.display())))
            }
        }
    }

    /// Resolved state directory, created on demand.
    pub fn state_dir(&self) -> Result<PathBuf> {
        let dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .context("could not determine data directory")?
                .join("snag"),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create state dir {}", dir.display()))?;
        Ok(dir)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.catalog.page_delay_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.cycle_interval_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.claim.lock_ttl_secs)
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("could not determine config directory")?
        .join("snag")
        .join("config.json"))
}

/// Path of the persisted session envelope under the state dir.
pub fn session_envelope_path(config: &SnagConfig) -> Result<PathBuf> {
    Ok(config.state_dir()?.join("session.enc.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let parsed: SnagConfig = serde_json::from_str(
            r#"{
                "catalog": { "endpoint": "https://hiring.example/graphql", "location": "Portland, OR" },
                "session": { "driverEndpoint": "http://127.0.0.1:9000", "username": "op@example.com" }
            }"#,
        )
        .unwrap();

        assert_eq!(parsed.catalog.page_size, 100);
        assert_eq!(parsed.claim.workers, 4);
        assert_eq!(parsed.schedule.cycle_interval_secs, 300);
        assert_eq!(parsed.catalog.location, "Portland, OR");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let outcome = serde_json::from_str::<SnagConfig>(r#"{ "catalgo": {} }"#);
        assert!(outcome.is_err());
    }

    #[test]
    fn explicit_missing_config_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(SnagConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn config_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = SnagConfig {
            catalog: CatalogConfig {
                location: "Chicago, IL".into(),
                ..CatalogConfig::default()
            },
            ..SnagConfig::default()
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();

        let loaded = SnagConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.catalog.location, "Chicago, IL");
    }
}
