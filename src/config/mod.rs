use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4320;
const DEFAULT_MAX_PAGE_SIZE: i64 = 200;

/// Hard cap on any list page size, configured or requested.
pub const PAGE_SIZE_CAP: i64 = 500;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── TimeTrackingConfig ──────────────────────────────────────────────────────

/// Time-tracking feature switch (`[time_tracking]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeTrackingConfig {
    /// Accept time-log writes and compute spent-hour aggregates. Default: true.
    /// When false, spent-hour aggregates read 0 without querying and time-log
    /// creation is rejected with a validation error.
    pub enabled: bool,
}

impl Default for TimeTrackingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ─── LimitsConfig ────────────────────────────────────────────────────────────

/// List pagination limits (`[limits]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Default page size for list endpoints (default: 200; hard cap 500).
    pub max_page_size: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

// ─── ObservabilityConfig ─────────────────────────────────────────────────────

/// Observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// HTTP server port (default: 4320).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,trackd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// Time-tracking feature switch (`[time_tracking]`).
    time_tracking: Option<TimeTrackingConfig>,
    /// List pagination limits (`[limits]`).
    limits: Option<LimitsConfig>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── ServerConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Bind address for the HTTP server (TRACKD_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Time-tracking feature switch.
    pub time_tracking: TimeTrackingConfig,
    /// List pagination limits.
    pub limits: LimitsConfig,
    /// Slow query threshold and future observability settings.
    pub observability: ObservabilityConfig,
}

impl ServerConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("TRACKD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("TRACKD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let time_tracking = toml.time_tracking.unwrap_or_default();
        let limits = toml.limits.unwrap_or_default();
        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            bind_address,
            log_format,
            time_tracking,
            limits,
            observability,
        }
    }

    /// Effective page size for a list request: the caller's `limit` if given,
    /// else the configured default, always clamped to `PAGE_SIZE_CAP`.
    pub fn page_size(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.limits.max_page_size)
            .clamp(1, PAGE_SIZE_CAP)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            log: "info".to_string(),
            bind_address: default_bind_address(),
            log_format: "pretty".to_string(),
            time_tracking: TimeTrackingConfig::default(),
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/trackd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("trackd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/trackd or ~/.local/share/trackd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("trackd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("trackd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\trackd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("trackd");
        }
    }
    // Fallback
    PathBuf::from(".trackd")
}
