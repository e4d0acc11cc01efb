//! TOML configuration parsing and validation.
//!
//! Remote-store settings may also come from the environment
//! (`ES_BASE_URL`, `ES_USER_NAME`, `ES_PASSWORD`), which takes precedence
//! over the file so credentials can stay out of it.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::partition::Horizon;
use crate::predicate::{default_rules, MatchPredicate, MatchRule};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default = "default_rules")]
    pub match_rules: Vec<MatchRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout", with = "humantime_serde")]
    pub busy_timeout: Duration,
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    /// How long the server keeps a scroll context alive between requests.
    #[serde(default = "default_scroll_keepalive", with = "humantime_serde")]
    pub scroll_keepalive: Duration,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_index_prefix() -> String {
    "junoslogs-".to_string()
}
fn default_scroll_keepalive() -> Duration {
    Duration::from_secs(60)
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Safety margin subtracted from "now" before picking the newest partition.
    #[serde(default = "default_horizon_skew", with = "humantime_serde")]
    pub horizon_skew: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            concurrency: default_concurrency(),
            horizon_skew: default_horizon_skew(),
        }
    }
}

fn default_page_size() -> usize {
    1000
}
fn default_concurrency() -> usize {
    4
}
fn default_horizon_skew() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

impl Config {
    /// Compile the configured rules into a single predicate.
    pub fn predicate(&self) -> Result<MatchPredicate> {
        Ok(MatchPredicate::build(&self.match_rules)?)
    }

    /// The horizon skew as a chrono duration.
    pub fn horizon_skew(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.sync.horizon_skew)
            .context("sync.horizon_skew is out of range")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config.remote);
    validate(&config)?;

    Ok(config)
}

fn apply_env_overrides(remote: &mut RemoteConfig) {
    if let Ok(url) = std::env::var("ES_BASE_URL") {
        remote.base_url = url;
    }
    if let Ok(user) = std::env::var("ES_USER_NAME") {
        remote.username = Some(user);
    }
    if let Ok(password) = std::env::var("ES_PASSWORD") {
        remote.password = Some(password);
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.sync.page_size == 0 {
        bail!("sync.page_size must be > 0");
    }
    if config.sync.concurrency == 0 {
        bail!("sync.concurrency must be >= 1");
    }
    if config.remote.index_prefix.is_empty() {
        bail!("remote.index_prefix must not be empty");
    }
    if config.remote.scroll_keepalive.as_secs() == 0 {
        bail!("remote.scroll_keepalive must be at least one second");
    }
    reqwest::Url::parse(&config.remote.base_url)
        .with_context(|| format!("remote.base_url is not a valid URL: {}", config.remote.base_url))?;
    config.predicate()?;
    Horizon::new(&config.remote.index_prefix, Utc::now(), config.horizon_skew()?)
        .context("sync.horizon_skew is too large")?;
    Ok(())
}
