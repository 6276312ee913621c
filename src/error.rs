use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the bofang media proxy
#[derive(Error, Debug, Clone)]
pub enum BofangError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network related errors (origin unreachable, connect/read failures)
    #[error("Network error: {message}")]
    Network { message: String },

    /// A resolver strategy could not produce a playable URL.
    /// Never fatal; the chain proceeds to the next candidate.
    #[error("Parse failure: {message}")]
    ParseFailure { message: String },

    /// Unparseable inbound HTTP request; the connection is dropped silently
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    /// Connection limit or bandwidth budget exhausted
    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    /// Peer address is not on the allow-list
    #[error("Access denied for {peer}")]
    AccessDenied { peer: String },

    /// Disk read/write failure in a cache tier; treated as a cache miss
    #[error("Cache IO error: {message}")]
    CacheIo { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl BofangError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a parse failure
    pub fn parse_failure<S: Into<String>>(message: S) -> Self {
        Self::ParseFailure {
            message: message.into(),
        }
    }

    /// Create a malformed request error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }

    /// Create a capacity exceeded error
    pub fn capacity<S: Into<String>>(message: S) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Create an access denied error
    pub fn access_denied<S: Into<String>>(peer: S) -> Self {
        Self::AccessDenied { peer: peer.into() }
    }

    /// Create a cache IO error
    pub fn cache_io<S: Into<String>>(message: S) -> Self {
        Self::CacheIo {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the connection is closed without writing any response body
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            BofangError::MalformedRequest { .. } | BofangError::AccessDenied { .. }
        )
    }

    /// Whether a resolver chain may continue with the next strategy
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BofangError::ParseFailure { .. }
                | BofangError::Network { .. }
                | BofangError::Timeout { .. }
                | BofangError::CacheIo { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BofangError::Config { .. } => ErrorSeverity::Critical,
            BofangError::Internal { .. } => ErrorSeverity::High,
            BofangError::Io { .. } => ErrorSeverity::Medium,
            BofangError::Network { .. } => ErrorSeverity::Medium,
            BofangError::Timeout { .. } => ErrorSeverity::Medium,
            BofangError::CapacityExceeded { .. } => ErrorSeverity::Medium,
            BofangError::AccessDenied { .. } => ErrorSeverity::Low,
            BofangError::MalformedRequest { .. } => ErrorSeverity::Low,
            BofangError::ParseFailure { .. } => ErrorSeverity::Low,
            BofangError::CacheIo { .. } => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for bofang operations
pub type BofangResult<T> = Result<T, BofangError>;

/// Convert from std::io::Error to BofangError
impl From<std::io::Error> for BofangError {
    fn from(err: std::io::Error) -> Self {
        BofangError::io(format!("IO error: {}", err))
    }
}

/// Convert from hyper::Error to BofangError
impl From<hyper::Error> for BofangError {
    fn from(err: hyper::Error) -> Self {
        if err.is_timeout() {
            BofangError::timeout(Duration::from_secs(30), "HTTP request")
        } else if err.is_connect() {
            BofangError::network(format!("Connection error: {}", err))
        } else {
            BofangError::network(format!("HTTP error: {}", err))
        }
    }
}

/// Convert from hyper::http::Error to BofangError
impl From<hyper::http::Error> for BofangError {
    fn from(err: hyper::http::Error) -> Self {
        BofangError::network(format!("HTTP error: {}", err))
    }
}

/// Convert from hyper::http::uri::InvalidUri to BofangError
impl From<hyper::http::uri::InvalidUri> for BofangError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        BofangError::parse_failure(format!("Invalid URI: {}", err))
    }
}

/// Convert from serde_json::Error to BofangError
impl From<serde_json::Error> for BofangError {
    fn from(err: serde_json::Error) -> Self {
        BofangError::internal(format!("JSON serialization error: {}", err))
    }
}

/// Convert from toml::de::Error to BofangError
impl From<toml::de::Error> for BofangError {
    fn from(err: toml::de::Error) -> Self {
        BofangError::config(format!("TOML parsing error: {}", err))
    }
}

/// Convert from notify::Error to BofangError
impl From<notify::Error> for BofangError {
    fn from(err: notify::Error) -> Self {
        BofangError::io(format!("File watching error: {}", err))
    }
}

/// Convert from tokio::time::Elapsed to BofangError
impl From<tokio::time::error::Elapsed> for BofangError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BofangError::timeout(Duration::from_secs(30), "operation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = BofangError::config("Invalid listen port");
        assert!(matches!(config_err, BofangError::Config { .. }));
        assert_eq!(
            config_err.to_string(),
            "Configuration error: Invalid listen port"
        );

        let network_err = BofangError::network("Connection refused");
        assert!(matches!(network_err, BofangError::Network { .. }));
        assert_eq!(network_err.to_string(), "Network error: Connection refused");

        let timeout_err = BofangError::timeout(Duration::from_secs(30), "resolver attempt");
        assert!(matches!(timeout_err, BofangError::Timeout { .. }));
        assert_eq!(
            timeout_err.to_string(),
            "Operation timed out after 30s: resolver attempt"
        );
    }

    #[test]
    fn test_error_properties() {
        let parse_err = BofangError::parse_failure("no media url in page");
        assert!(parse_err.is_recoverable());
        assert!(!parse_err.is_silent());
        assert_eq!(parse_err.severity(), ErrorSeverity::Low);

        let malformed = BofangError::malformed("missing request line");
        assert!(malformed.is_silent());
        assert!(!malformed.is_recoverable());

        let denied = BofangError::access_denied("10.0.0.9");
        assert!(denied.is_silent());
        assert_eq!(denied.to_string(), "Access denied for 10.0.0.9");

        let config_err = BofangError::config("bad config");
        assert!(!config_err.is_recoverable());
        assert_eq!(config_err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::High);
        assert!(ErrorSeverity::High > ErrorSeverity::Medium);
        assert!(ErrorSeverity::Medium > ErrorSeverity::Low);
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: BofangError = io_error.into();
        assert!(matches!(err, BofangError::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BofangError = json_error.into();
        assert!(matches!(err, BofangError::Internal { .. }));
    }
}
