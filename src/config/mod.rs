use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Static configuration for a single peer service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logical service name (e.g., "payment-service")
    pub name: String,

    /// Host to dial. Empty means localhost (local development).
    #[serde(default)]
    pub host: String,

    /// Port the peer listens on
    pub port: u16,
}

/// Serialized pool tunables. All values have defaults and may be overridden
/// per deployment; durations are expressed in whole seconds except the
/// backoff knobs, which are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Upper bound on a single connect attempt
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,

    /// Total dial attempts per connection (first attempt included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential retry backoff
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Ceiling for the retry backoff delay
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Keepalive ping interval. Kept high so peers don't reject the channel
    /// for pinging too often.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// How long to wait for a keepalive ping ack before declaring the
    /// channel dead
    #[serde(default = "default_keepalive_timeout_secs")]
    pub keepalive_timeout_secs: u64,

    /// How long to wait for a freshly dialed channel to become ready
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Maximum outbound message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Interval between health monitor sweeps
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Kubernetes namespace for DNS-based target resolution. When unset,
    /// targets resolve to the configured host (or localhost).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn default_dial_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    10_000
}

fn default_keepalive_interval_secs() -> u64 {
    60
}

fn default_keepalive_timeout_secs() -> u64 {
    20
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_max_message_size() -> usize {
    4 * 1024 * 1024
}

fn default_health_interval_secs() -> u64 {
    30
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            dial_timeout_secs: default_dial_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            keepalive_timeout_secs: default_keepalive_timeout_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            max_message_size: default_max_message_size(),
            health_interval_secs: default_health_interval_secs(),
            namespace: None,
        }
    }
}

impl PoolSettings {
    /// Convert the serialized settings into runtime options
    pub fn to_options(&self) -> PoolOptions {
        PoolOptions {
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            keepalive_timeout: Duration::from_secs(self.keepalive_timeout_secs),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            max_message_size: self.max_message_size,
            health_interval: Duration::from_secs(self.health_interval_secs),
            namespace: self.namespace.clone(),
        }
    }
}

/// Runtime pool tunables, resolved from [`PoolSettings`] or built directly
/// in code (tests typically shrink the timing knobs)
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub dial_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub ready_timeout: Duration,
    pub max_message_size: usize,
    pub health_interval: Duration,
    pub namespace: Option<String>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolSettings::default().to_options()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Peer services this process dials
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Pool behavior
    #[serde(default)]
    pub pool: PoolSettings,
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// Supported variables:
/// - `MESHPOOL_SERVICES` (required): comma-separated `name=host:port` entries;
///   an empty host means localhost (e.g., `payment=:50055,trips=10.0.0.7:50051`)
/// - `MESHPOOL_NAMESPACE` (optional): Kubernetes namespace for DNS targets
/// - `MESHPOOL_DIAL_TIMEOUT_SECS`, `MESHPOOL_MAX_ATTEMPTS`,
///   `MESHPOOL_HEALTH_INTERVAL_SECS` (optional overrides)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let services_str = std::env::var("MESHPOOL_SERVICES")
        .context("MESHPOOL_SERVICES environment variable not set")?;

    let mut services = Vec::new();
    for entry in services_str.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, addr) = entry.split_once('=').with_context(|| {
            format!("Invalid MESHPOOL_SERVICES entry '{}', expected name=host:port", entry)
        })?;
        let (host, port) = addr.rsplit_once(':').with_context(|| {
            format!("Invalid address '{}' for service '{}', expected host:port", addr, name)
        })?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("Invalid port '{}' for service '{}'", port, name))?;

        services.push(ServiceConfig {
            name: name.trim().to_string(),
            host: host.trim().to_string(),
            port,
        });
    }

    if services.is_empty() {
        anyhow::bail!("MESHPOOL_SERVICES contains no valid entries");
    }

    let mut pool = PoolSettings {
        namespace: std::env::var("MESHPOOL_NAMESPACE").ok().filter(|s| !s.is_empty()),
        ..PoolSettings::default()
    };

    if let Ok(val) = std::env::var("MESHPOOL_DIAL_TIMEOUT_SECS") {
        if let Ok(secs) = val.parse() {
            pool.dial_timeout_secs = secs;
        }
    }

    if let Ok(val) = std::env::var("MESHPOOL_MAX_ATTEMPTS") {
        if let Ok(attempts) = val.parse() {
            pool.max_attempts = attempts;
        }
    }

    if let Ok(val) = std::env::var("MESHPOOL_HEALTH_INTERVAL_SECS") {
        if let Ok(secs) = val.parse() {
            pool.health_interval_secs = secs;
        }
    }

    Ok(Config { services, pool })
}

/// Load configuration from file or environment
///
/// Tries the YAML file when a path is given, otherwise falls back to
/// environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        load_from_yaml(path)
    } else {
        load_from_env()
    }
}
