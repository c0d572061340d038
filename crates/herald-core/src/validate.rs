//! Settings validation with stable error codes.
//!
//! Every rule is a small standalone function so callers can validate a single
//! field; [`crate::config::ServerConfig::validate`] runs them all and collects
//! every violation instead of stopping at the first.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

pub mod codes {
    pub const PORT_RANGE: &str = "SSE-1001";
    pub const PORT_PRIVILEGED: &str = "SSE-1002";
    pub const PATH_EMPTY: &str = "SSE-1003";
    pub const PATH_FORMAT: &str = "SSE-1004";
    pub const PATH_SLASHES: &str = "SSE-1005";
    pub const PATH_CHARS: &str = "SSE-1006";
    pub const MAX_CONN_MIN: &str = "SSE-1007";
    pub const MAX_CONN_MAX: &str = "SSE-1008";
    pub const CORS_ORIGINS: &str = "SSE-1009";
    pub const CORS_FORMAT: &str = "SSE-1010";
    pub const EVENT_TTL_MIN: &str = "SSE-1012";
    pub const EVENT_TTL_MAX: &str = "SSE-1013";
    pub const KEEP_ALIVE_MIN: &str = "SSE-1014";
    pub const KEEP_ALIVE_MAX: &str = "SSE-1015";
    pub const STORE_SIZE_MIN: &str = "SSE-1022";
    pub const STORE_SIZE_MAX: &str = "SSE-1023";
}

pub const MAX_CONNECTIONS_LIMIT: usize = 100_000;
pub const MAX_EVENT_TTL_SECS: u64 = 86_400;
pub const MAX_STORE_SIZE: usize = 10_000;
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;
pub const MAX_KEEP_ALIVE_SECS: u64 = 300;

fn message_for(code: &str) -> &'static str {
    match code {
        codes::PORT_RANGE => "Port must be between 1 and 65535",
        codes::PORT_PRIVILEGED => "Ports below 1024 typically require root privileges",
        codes::PATH_EMPTY => "SSE endpoint path cannot be empty",
        codes::PATH_FORMAT => "SSE endpoint path must start with '/'",
        codes::PATH_SLASHES => "SSE endpoint path cannot contain consecutive slashes",
        codes::PATH_CHARS => {
            "SSE endpoint path contains invalid characters. Use only a-z, A-Z, 0-9, /, _, -"
        }
        codes::MAX_CONN_MIN => "Maximum connections must be at least 1",
        codes::MAX_CONN_MAX => "Maximum connections should not exceed 100,000",
        codes::CORS_ORIGINS => "CORS origins must be specified when CORS is enabled",
        codes::CORS_FORMAT => {
            "Invalid CORS origin format. Use http(s)://domain[:port] or '*' for all origins"
        }
        codes::EVENT_TTL_MIN => "Event store TTL must be at least 1 second",
        codes::EVENT_TTL_MAX => "Event store TTL should not exceed 24 hours (86400 seconds)",
        codes::KEEP_ALIVE_MIN => "Keep-alive interval must be at least 5 seconds",
        codes::KEEP_ALIVE_MAX => "Keep-alive interval should not exceed 300 seconds",
        codes::STORE_SIZE_MIN => "Event store size must be at least 1",
        codes::STORE_SIZE_MAX => "Event store size should not exceed 10,000",
        _ => "Unknown validation error",
    }
}

/// One violated settings rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: &'static str,
    pub field: String,
    pub value: Value,
}

impl ValidationError {
    pub fn new(code: &'static str, field: &str, value: impl Into<Value>) -> Self {
        Self {
            code,
            message: message_for(code),
            field: field.to_string(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (field: {}, value: {})",
            self.code, self.message, self.field, self.value
        )
    }
}

impl std::error::Error for ValidationError {}

type Check = Result<(), ValidationError>;

pub fn port(port: u32) -> Check {
    if !(1..=65_535).contains(&port) {
        return Err(ValidationError::new(codes::PORT_RANGE, "port", port));
    }
    if port < 1024 && port != 80 && port != 443 {
        return Err(ValidationError::new(codes::PORT_PRIVILEGED, "port", port));
    }
    Ok(())
}

pub fn path(path: &str) -> Check {
    if path.trim().is_empty() {
        return Err(ValidationError::new(codes::PATH_EMPTY, "path", path));
    }
    if !path.starts_with('/') {
        return Err(ValidationError::new(codes::PATH_FORMAT, "path", path));
    }
    if path.contains("//") {
        return Err(ValidationError::new(codes::PATH_SLASHES, "path", path));
    }
    let valid = path
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'_' | b'-'));
    if !valid {
        return Err(ValidationError::new(codes::PATH_CHARS, "path", path));
    }
    Ok(())
}

pub fn max_connections(max: usize) -> Check {
    if max < 1 {
        return Err(ValidationError::new(codes::MAX_CONN_MIN, "maxConnections", max));
    }
    if max > MAX_CONNECTIONS_LIMIT {
        return Err(ValidationError::new(codes::MAX_CONN_MAX, "maxConnections", max));
    }
    Ok(())
}

/// `origins` is the raw comma-separated list from the config.
pub fn cors_origins(origins: &str) -> Check {
    if origins.trim().is_empty() {
        return Err(ValidationError::new(codes::CORS_ORIGINS, "corsOrigins", origins));
    }
    if origins.trim() == "*" {
        return Ok(());
    }
    for origin in origins.split(',').map(str::trim) {
        if origin != "*" && !is_origin_like(origin) {
            return Err(ValidationError::new(codes::CORS_FORMAT, "corsOrigins", origin));
        }
    }
    Ok(())
}

/// `http(s)://` followed by a host that neither starts with a URL delimiter
/// nor contains whitespace.
fn is_origin_like(origin: &str) -> bool {
    let rest = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"));
    let Some(rest) = rest else {
        return false;
    };
    match rest.chars().next() {
        None | Some('/' | '$' | '.' | '?' | '#') => false,
        Some(_) => rest.chars().count() >= 2 && !rest.chars().any(char::is_whitespace),
    }
}

pub fn event_ttl(secs: u64) -> Check {
    if secs < 1 {
        return Err(ValidationError::new(codes::EVENT_TTL_MIN, "eventTTL", secs));
    }
    if secs > MAX_EVENT_TTL_SECS {
        return Err(ValidationError::new(codes::EVENT_TTL_MAX, "eventTTL", secs));
    }
    Ok(())
}

pub fn event_store_size(size: usize) -> Check {
    if size < 1 {
        return Err(ValidationError::new(codes::STORE_SIZE_MIN, "eventStoreSize", size));
    }
    if size > MAX_STORE_SIZE {
        return Err(ValidationError::new(codes::STORE_SIZE_MAX, "eventStoreSize", size));
    }
    Ok(())
}

pub fn keep_alive_interval(secs: u64) -> Check {
    if secs < MIN_KEEP_ALIVE_SECS {
        return Err(ValidationError::new(codes::KEEP_ALIVE_MIN, "keepAliveInterval", secs));
    }
    if secs > MAX_KEEP_ALIVE_SECS {
        return Err(ValidationError::new(codes::KEEP_ALIVE_MAX, "keepAliveInterval", secs));
    }
    Ok(())
}
