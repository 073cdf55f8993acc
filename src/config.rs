use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::stats::{ServiceName, StatsOptions};

/// Top-level configuration for the satellite agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dashboard api key (a UUID), sent as bearer token.
    #[serde(default)]
    pub api_key: String,

    /// Dashboard API configuration.
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Node configuration directory. Default: ~/.chia/mainnet.
    #[serde(default = "default_chia_config_directory")]
    pub chia_config_directory: PathBuf,

    /// Overrides the daemon address from the node configuration.
    #[serde(default)]
    pub chia_daemon_address: Option<String>,

    /// Daemon connection configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Services whose stats are never collected.
    #[serde(default)]
    pub excluded_services: Vec<String>,

    /// Flush rate of stats updates. Default: regular.
    #[serde(default)]
    pub update_mode: UpdateMode,

    /// Send full service records on every flush instead of diffs.
    #[serde(default)]
    pub enable_compatibility_mode: bool,

    /// Harvester response time samples kept. Default: 100.
    #[serde(default = "default_max_response_time_samples")]
    pub max_response_time_samples: usize,

    /// Farming infos kept. Default: 20.
    #[serde(default = "default_max_farming_infos")]
    pub max_farming_infos: usize,

    /// How often to check which services are running. Default: 60s.
    #[serde(default = "default_liveness_interval", with = "humantime_serde")]
    pub liveness_interval: Duration,

    /// How often to re-pull poll-based stats. Default: 20s.
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Delay between startup attempts. Default: 1s.
    #[serde(default = "default_startup_retry_backoff", with = "humantime_serde")]
    pub startup_retry_backoff: Duration,

    /// Extra wait after the daemon became reachable. Default: 5s.
    #[serde(default = "default_daemon_settle_delay", with = "humantime_serde")]
    pub daemon_settle_delay: Duration,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Dashboard API configuration.
#[derive(Debug, Deserialize)]
pub struct DashboardConfig {
    /// Base URLs of dashboard API endpoints, raced for the fastest.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Request timeout. Default: 15s.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Daemon connection configuration.
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    /// Per-request timeout. Default: 15s.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9091".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

/// Operator-selected flush rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    Slow,
    #[default]
    Regular,
    Fast,
}

impl UpdateMode {
    /// Minimum time between two flushes.
    pub fn interval(&self) -> Duration {
        match self {
            UpdateMode::Slow => Duration::from_secs(90),
            UpdateMode::Regular => Duration::from_secs(60),
            UpdateMode::Fast => Duration::from_secs(30),
        }
    }
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chia_config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".chia")
        .join("mainnet")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_response_time_samples() -> usize {
    100
}

fn default_max_farming_infos() -> usize {
    20
}

fn default_liveness_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_startup_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_daemon_settle_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_health_addr() -> String {
    ":9091".to_string()
}

/// Default config file location: ~/.config/chia-dashboard-satellite/config.yaml.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".config")
        .join("chia-dashboard-satellite")
        .join("config.yaml")
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_key: String::new(),
            dashboard: DashboardConfig::default(),
            chia_config_directory: default_chia_config_directory(),
            chia_daemon_address: None,
            daemon: DaemonConfig::default(),
            excluded_services: Vec::new(),
            update_mode: UpdateMode::default(),
            enable_compatibility_mode: false,
            max_response_time_samples: default_max_response_time_samples(),
            max_farming_infos: default_max_farming_infos(),
            liveness_interval: default_liveness_interval(),
            refresh_interval: default_refresh_interval(),
            startup_retry_backoff: default_startup_retry_backoff(),
            daemon_settle_delay: default_daemon_settle_delay(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout: default_request_timeout(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            bail!("api_key is required");
        }

        uuid::Uuid::parse_str(&self.api_key).context("api_key must be a UUID")?;

        if self.dashboard.endpoints.is_empty() {
            bail!("dashboard.endpoints requires at least one endpoint");
        }

        for endpoint in &self.dashboard.endpoints {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                bail!("dashboard endpoint must be an http(s) URL: {endpoint}");
            }
        }

        if self.dashboard.timeout.is_zero() {
            bail!("dashboard.timeout must be positive");
        }

        if self.daemon.timeout.is_zero() {
            bail!("daemon.timeout must be positive");
        }

        if self.max_response_time_samples == 0 {
            bail!("max_response_time_samples must be positive");
        }

        if self.max_farming_infos == 0 {
            bail!("max_farming_infos must be positive");
        }

        if self.liveness_interval.is_zero() {
            bail!("liveness_interval must be positive");
        }

        if self.refresh_interval.is_zero() {
            bail!("refresh_interval must be positive");
        }

        if self.startup_retry_backoff.is_zero() {
            bail!("startup_retry_backoff must be positive");
        }

        for name in &self.excluded_services {
            if ServiceName::from_name(name).is_none() {
                tracing::warn!(name, "unknown service in excluded_services");
            }
        }

        Ok(())
    }

    /// Collector settings derived from this configuration.
    pub fn stats_options(&self) -> StatsOptions {
        StatsOptions {
            excluded_services: self.excluded_services.clone(),
            compatibility_mode: self.enable_compatibility_mode,
            max_response_time_samples: self.max_response_time_samples,
            max_farming_infos: self.max_farming_infos,
        }
    }
}
