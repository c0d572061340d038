use thiserror::Error;

use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings validation failed: {}", join_validation(.0))]
    Validation(Vec<ValidationError>),

    #[error("Connection limit exceeded: {active}/{max} connections")]
    CapacityExceeded { active: usize, max: usize },

    #[error("Method not allowed: {method}")]
    MethodNotAllowed { method: String },

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Write to connection {conn_id} failed: {reason}")]
    Transport { conn_id: String, reason: String },

    #[error("Connection is closed: {id}")]
    ConnectionClosed { id: String },

    #[error("Connection not found: {id}")]
    ConnectionNotFound { id: String },

    #[error("No server registered under '{name}'")]
    ServerNotFound { name: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HeraldError {
    /// Short error code string sent to clients in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            HeraldError::Config(_) => "CONFIG_ERROR",
            HeraldError::Validation(_) => "VALIDATION_ERROR",
            HeraldError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            HeraldError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            HeraldError::ShuttingDown => "SHUTTING_DOWN",
            HeraldError::Transport { .. } => "TRANSPORT_ERROR",
            HeraldError::ConnectionClosed { .. } => "CONNECTION_CLOSED",
            HeraldError::ConnectionNotFound { .. } => "NOT_FOUND",
            HeraldError::ServerNotFound { .. } => "SERVER_NOT_FOUND",
            HeraldError::Protocol(_) => "PROTOCOL_ERROR",
            HeraldError::Serialization(_) => "SERIALIZATION_ERROR",
            HeraldError::Io(_) => "IO_ERROR",
            HeraldError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

fn join_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, HeraldError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::codes;

    #[test]
    fn validation_errors_are_joined() {
        let err = HeraldError::Validation(vec![
            ValidationError::new(codes::PORT_RANGE, "port", 0),
            ValidationError::new(codes::PATH_EMPTY, "path", ""),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("[SSE-1001]"));
        assert!(msg.contains("; [SSE-1003]"));
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            HeraldError::CapacityExceeded { active: 1, max: 1 }.code(),
            "CAPACITY_EXCEEDED"
        );
        assert_eq!(
            HeraldError::ConnectionNotFound { id: "x".into() }.code(),
            "NOT_FOUND"
        );
    }
}
