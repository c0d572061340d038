use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use tracing::debug;

use crate::error::{HeraldError, Result};
use crate::validate;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PATH: &str = "/events";
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;
pub const DEFAULT_CORS_ORIGINS: &str = "*";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
pub const DEFAULT_EVENT_STORE_SIZE: usize = 100;
pub const DEFAULT_EVENT_TTL_SECS: u64 = 3600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2_000;

// Wire-level names. Must match what EventSource clients send and expect.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";
pub const LAST_EVENT_ID_QUERY: &str = "lastEventId";
pub const TOPIC_QUERY: &str = "topic";
pub const CONNECTED_EVENT: &str = "connected";
pub const KEEP_ALIVE_EVENT: &str = "keep-alive";
pub const KEEP_ALIVE_DATA: &str = "ping";

/// Server settings (herald.toml + HERALD_* env overrides).
///
/// Keys are snake_case; the camelCase spellings used by existing
/// deployments (`maxConnections`, `enableCORS`, `eventTTL`, ...) are accepted
/// as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_max_connections", alias = "maxConnections")]
    pub max_connections: usize,
    #[serde(default = "bool_true", alias = "enableCORS")]
    pub enable_cors: bool,
    #[serde(default = "default_cors_origins", alias = "corsOrigins")]
    pub cors_origins: String,
    /// Seconds between keep-alive events.
    #[serde(default = "default_keep_alive", alias = "keepAliveInterval")]
    pub keep_alive_interval: u64,
    #[serde(default = "bool_true", alias = "enableEventStore")]
    pub enable_event_store: bool,
    #[serde(default = "default_event_store_size", alias = "eventStoreSize")]
    pub event_store_size: usize,
    /// Seconds a buffered event stays eligible for replay.
    #[serde(default = "default_event_ttl", alias = "eventTTL")]
    pub event_ttl: u64,
    #[serde(default = "default_sweep_interval", alias = "historySweepInterval")]
    pub history_sweep_interval: u64,
    #[serde(default = "default_shutdown_timeout", alias = "shutdownTimeout")]
    pub shutdown_timeout: u64,
    #[serde(default = "default_dispatch_capacity", alias = "dispatchQueueCapacity")]
    pub dispatch_queue_capacity: usize,
    #[serde(default = "default_write_timeout", alias = "writeTimeoutMs")]
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: DEFAULT_PORT,
            path: default_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            enable_cors: true,
            cors_origins: default_cors_origins(),
            keep_alive_interval: DEFAULT_KEEP_ALIVE_SECS,
            enable_event_store: true,
            event_store_size: DEFAULT_EVENT_STORE_SIZE,
            event_ttl: DEFAULT_EVENT_TTL_SECS,
            history_sweep_interval: DEFAULT_SWEEP_INTERVAL_SECS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            dispatch_queue_capacity: DEFAULT_DISPATCH_QUEUE_CAPACITY,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_path() -> String {
    DEFAULT_PATH.to_string()
}
fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}
fn default_cors_origins() -> String {
    DEFAULT_CORS_ORIGINS.to_string()
}
fn default_keep_alive() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}
fn default_event_store_size() -> usize {
    DEFAULT_EVENT_STORE_SIZE
}
fn default_event_ttl() -> u64 {
    DEFAULT_EVENT_TTL_SECS
}
fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}
fn default_dispatch_capacity() -> usize {
    DEFAULT_DISPATCH_QUEUE_CAPACITY
}
fn default_write_timeout() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

impl ServerConfig {
    /// Load config from a TOML file with HERALD_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. HERALD_CONFIG env var
    ///   3. ~/.herald/herald.toml
    ///
    /// A missing file is not an error; every option has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading configuration");

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("HERALD_").ignore(&["config"])),
        )
    }

    /// Extract from an arbitrary figment (tests feed inline TOML here).
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| HeraldError::Config(e.to_string()))
    }

    /// Run every settings rule and collect all violations.
    ///
    /// History rules only apply when the event store is enabled and CORS
    /// rules only when CORS is enabled.
    pub fn validate(&self) -> std::result::Result<(), Vec<validate::ValidationError>> {
        let mut checks = vec![
            validate::port(u32::from(self.port)),
            validate::path(&self.path),
            validate::max_connections(self.max_connections),
            validate::keep_alive_interval(self.keep_alive_interval),
        ];
        if self.enable_cors {
            checks.push(validate::cors_origins(&self.cors_origins));
        }
        if self.enable_event_store {
            checks.push(validate::event_ttl(self.event_ttl));
            checks.push(validate::event_store_size(self.event_store_size));
        }

        let errors: Vec<_> = checks.into_iter().filter_map(|c| c.err()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and convert the violation list into a single config error.
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate().map_err(HeraldError::Validation)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval)
    }

    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.event_ttl)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.history_sweep_interval.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Stream path without a trailing slash, so sibling admin routes can be
    /// built as `{base}/health`. The root path maps to an empty base.
    pub fn base_path(&self) -> &str {
        self.path.trim_end_matches('/')
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn default_config_path() -> String {
    if let Ok(path) = std::env::var("HERALD_CONFIG") {
        return path;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.herald/herald.toml", home)
}
