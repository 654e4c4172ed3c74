use thiserror::Error;

/// Main error type for the dashboard core
#[derive(Error, Debug)]
pub enum SentinelError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    // Protocol errors
    #[error("HTTP {status}: {detail}")]
    HttpStatus { status: u16, detail: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SentinelError {
    /// Transport-level failures (unreachable host, DNS, reset, timeout).
    pub fn is_transport(&self) -> bool {
        match self {
            SentinelError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            SentinelError::WebSocket(_) | SentinelError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        SentinelError::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }
}

/// Result type alias for SentinelError
pub type Result<T> = std::result::Result<T, SentinelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SentinelError::HttpStatus {
            status: 503,
            detail: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");

        let err = SentinelError::timeout("GET /status", 10_000);
        assert_eq!(err.to_string(), "Timed out after 10000ms: GET /status");
        assert!(err.is_transport());
    }

    #[test]
    fn test_validation_is_not_transport() {
        let err = SentinelError::Validation("killswitch reason is required".to_string());
        assert!(!err.is_transport());
    }
}
