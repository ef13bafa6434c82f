//! Configuration management
//!
//! Layered configuration: `config/default.toml`, an optional
//! environment-specific file selected by `ENV`, `config/local.toml`, and
//! finally `AXSCAN__`-prefixed environment variables. Every section carries
//! serde defaults so a bare deployment starts with sane values.

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};

use crate::domain::sandbox::NetworkMode;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub sandbox: SandboxConfig,
    pub browser: BrowserConfig,
    pub logging: LoggingConfig,
}

/// Scheduler and worker-pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent worker loops draining the queue.
    pub max_concurrency: usize,
    /// Sleep between polls when the queue is empty (milliseconds).
    pub poll_interval_ms: u64,
    /// Hard deadline for a single job attempt (milliseconds).
    pub processing_timeout_ms: u64,
    /// Base delay for exponential retry backoff (milliseconds).
    pub retry_backoff_ms: u64,
    /// Random jitter added on top of each backoff delay (milliseconds, max).
    pub retry_jitter_ms: u64,
    /// Default retry budget applied when a job does not specify one.
    pub default_max_retries: u32,
    /// Interval between orphaned-processing-marker sweeps (milliseconds).
    pub reaper_interval_ms: u64,
    /// Extra margin past the processing deadline before a marker counts as
    /// orphaned (milliseconds).
    pub reaper_grace_ms: u64,
    /// Dead-letter count above which the health monitor warns.
    pub dead_letter_warn_threshold: usize,
    /// In-flight job count above which the health monitor warns.
    pub in_flight_warn_threshold: usize,
    /// Interval between health-monitor checks (milliseconds).
    pub health_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            poll_interval_ms: 250,
            processing_timeout_ms: 120_000,
            retry_backoff_ms: 2_000,
            retry_jitter_ms: 500,
            default_max_retries: 3,
            reaper_interval_ms: 30_000,
            reaper_grace_ms: 5_000,
            dead_letter_warn_threshold: 50,
            in_flight_warn_threshold: 32,
            health_interval_ms: 60_000,
        }
    }
}

/// Sandbox (container) defaults applied to every scan environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container image hosting the browser and the scan agent.
    pub image: String,
    /// Container runtime binary (`docker` or `podman`).
    pub runtime_binary: String,
    /// Hard memory ceiling in megabytes. Swap is pinned to the same value.
    pub memory_mb: u64,
    /// CPU quota expressed in whole/fractional CPUs.
    pub cpu_quota: f64,
    /// Process-count ceiling inside the container.
    pub pids_limit: u32,
    /// Network mode for scan containers. Scans need outbound access to the
    /// target URL, so the default is an isolated virtual network rather than
    /// fully disabled.
    pub network: NetworkMode,
    /// Name of the isolated virtual network when `network = isolated`.
    pub isolated_network: String,
    /// Size cap of the writable, non-executable tmpfs in megabytes.
    pub tmpfs_mb: u64,
    /// Absolute wall-clock lifetime of a sandbox (milliseconds).
    pub timeout_ms: u64,
    /// Grace period given to a container on graceful stop (seconds).
    pub grace_period_secs: u64,
    /// Non-root user the container runs as (uid:gid).
    pub run_as_user: String,
    /// Capabilities re-added after `--cap-drop ALL`. Kept minimal; the
    /// browser runs with user-namespace sandboxing disabled inside the
    /// already-isolated container.
    pub cap_add: Vec<String>,
    /// Margin added to the orphan reaper's expiry check (milliseconds).
    pub reaper_grace_ms: u64,
    /// Interval between orphaned-container sweeps (milliseconds).
    pub reaper_interval_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "axscan/browser:latest".to_string(),
            runtime_binary: "docker".to_string(),
            memory_mb: 512,
            cpu_quota: 1.0,
            pids_limit: 128,
            network: NetworkMode::Isolated,
            isolated_network: "axscan-net".to_string(),
            tmpfs_mb: 64,
            timeout_ms: 180_000,
            grace_period_secs: 5,
            run_as_user: "1000:1000".to_string(),
            cap_add: Vec::new(),
            reaper_grace_ms: 10_000,
            reaper_interval_ms: 60_000,
        }
    }
}

/// Browser-driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browser executable path inside the sandbox image.
    pub executable: String,
    /// Scan-agent binary path inside the sandbox image.
    pub agent_path: String,
    /// User agent presented to scanned pages unless the job overrides it.
    pub user_agent: String,
    /// Navigation timeout (milliseconds).
    pub navigation_timeout_ms: u64,
    /// Settle delay between navigation and analysis (milliseconds).
    pub settle_delay_ms: u64,
    /// Timeout for an optional wait-for-selector step (milliseconds).
    pub selector_timeout_ms: u64,
    /// Extra tracking domains blocked on top of the built-in blocklist.
    pub extra_blocked_domains: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: "/usr/bin/chromium".to_string(),
            agent_path: "/opt/axscan/agent".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 axscan/0.1"
                .to_string(),
            navigation_timeout_ms: 30_000,
            settle_delay_ms: 500,
            selector_timeout_ms: 10_000,
            extra_blocked_domains: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("AXSCAN").separator("__"));

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.scheduler.validate()?;
        self.sandbox.validate()?;
        self.browser.validate()?;
        Ok(())
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}
