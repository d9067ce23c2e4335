use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/memprofd/memprofd.toml";
const ENV_CONFIG_PATH: &str = "MEMPROFD_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file. The path can be overridden with the
    /// `MEMPROFD_CONFIG` environment variable. If the file is missing or
    /// fails to parse, defaults are returned.
    pub fn load() -> Self {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(path);
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_bind")]
    pub bind_addr: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { bind_addr: default_broker_bind() }
    }
}

fn default_broker_bind() -> String {
    format!("127.0.0.1:{}", memprof_common::DEFAULT_BROKER_PORT)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewerConfig {
    #[serde(default = "default_viewer_bind")]
    pub bind_addr: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { bind_addr: default_viewer_bind() }
    }
}

fn default_viewer_bind() -> String {
    format!("127.0.0.1:{}", memprof_common::DEFAULT_VIEWER_PORT)
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Interval `memprofd` waits between `RECEIVE` polls when a broker
    /// queue comes back empty in `viewer-broker` mode. Shares its default
    /// with the Snapshot Builder's own tick period (spec §4.F) since both
    /// describe "how often to check back in the absence of new data".
    #[serde(default = "default_snapshot_period_ms")]
    pub snapshot_period_ms: u64,
    #[serde(default = "default_timeline_capacity")]
    pub timeline_capacity: usize,
    #[serde(default = "default_leak_threshold_ms")]
    pub leak_threshold_ms: u64,
    /// `[[registry.histogram_bins]]` entries of `{lo, hi}`; empty means the
    /// default power-of-two ladder (spec §3).
    #[serde(default)]
    pub histogram_bins: Vec<HistogramBinConfig>,
}

impl RegistryConfig {
    /// `histogram_bins` converted to the `(lo, hi)` pairs
    /// `Registry`/`ConsumerAggregator` take; `None` means "use the default
    /// power-of-two ladder".
    pub fn histogram_ladder(&self) -> Option<Vec<(u64, u64)>> {
        if self.histogram_bins.is_empty() {
            None
        } else {
            Some(self.histogram_bins.iter().map(|b| (b.lo, b.hi)).collect())
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            snapshot_period_ms: default_snapshot_period_ms(),
            timeline_capacity: default_timeline_capacity(),
            leak_threshold_ms: default_leak_threshold_ms(),
            histogram_bins: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct HistogramBinConfig {
    pub lo: u64,
    pub hi: u64,
}

fn default_snapshot_period_ms() -> u64 {
    memprof_common::DEFAULT_SNAPSHOT_PERIOD_MS
}
fn default_timeline_capacity() -> usize {
    memprof_common::DEFAULT_TIMELINE_CAPACITY
}
fn default_leak_threshold_ms() -> u64 {
    memprof_common::DEFAULT_LEAK_THRESHOLD_MS
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
