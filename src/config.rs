use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Orchestrator REST API (primary data path and killswitch)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the orchestrator service
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts per primary call before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Whole-activation budget for the killswitch, store fallback included
    #[serde(default)]
    pub killswitch_timeout_ms: Option<u64>,
    /// Force debug-level logging
    #[serde(default)]
    pub debug: bool,
}

fn default_api_base_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Never shorter than twice the request timeout: the orchestrator call
    /// may use one full timeout before the store write starts.
    pub fn killswitch_timeout(&self) -> Duration {
        let floor = self.timeout_ms.saturating_mul(2);
        Duration::from_millis(self.killswitch_timeout_ms.unwrap_or(floor).max(floor))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            killswitch_timeout_ms: None,
            debug: false,
        }
    }
}

/// Endpoint verification targets
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Base URL the endpoint probes are issued against
    #[serde(default = "default_probe_base_url")]
    pub base_url: String,
    /// Origin header pinned on every probe for CORS diagnosis
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Hard timeout per probe in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Secondary service base URL; `/health` is appended
    #[serde(default)]
    pub service_health_url: Option<String>,
}

fn default_probe_base_url() -> String {
    "https://api.trading-mvp.com".to_string()
}

fn default_origin() -> String {
    "http://localhost:4028".to_string()
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            base_url: default_probe_base_url(),
            origin: default_origin(),
            timeout_ms: default_timeout_ms(),
            service_health_url: None,
        }
    }
}

/// Live event stream connection
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// WebSocket endpoint; derived from the API base URL when unset
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Base reconnect delay, multiplied by the attempt number
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    /// Failed attempts in a row before the manager reports itself degraded
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    15_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    60_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl StreamConfig {
    /// Resolve the stream endpoint, swapping `http(s)` for `ws(s)` on the API base.
    pub fn resolve_ws_url(&self, api_base_url: &str) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        if let Some(rest) = api_base_url.strip_prefix("https") {
            format!("wss{}", rest)
        } else if let Some(rest) = api_base_url.strip_prefix("http") {
            format!("ws{}", rest)
        } else {
            api_base_url.to_string()
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Refresh cadence and derived-state tuning
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    /// Heartbeat silence before an agent is classified not-alive
    #[serde(default = "default_liveness_threshold_secs")]
    pub liveness_threshold_secs: i64,
    /// Number of recent events retained on the snapshot
    #[serde(default = "default_event_window")]
    pub event_window: usize,
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_liveness_threshold_secs() -> i64 {
    30
}

fn default_event_window() -> usize {
    20
}

impl DashboardConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            auto_refresh: true,
            liveness_threshold_secs: default_liveness_threshold_secs(),
            event_window: default_event_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL for the fallback record store
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_port() -> u16 {
    8088
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
        }
    }
}

impl SentinelConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("api.timeout_ms", 10_000)?
            .set_default("dashboard.refresh_interval_secs", 30)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SENTINEL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SENTINEL_API__BASE_URL, etc.)
            .add_source(
                Environment::with_prefix("SENTINEL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Stream endpoint after resolving the API fallback
    pub fn ws_url(&self) -> String {
        self.stream.resolve_ws_url(&self.api.base_url)
    }
}
