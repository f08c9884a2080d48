//! Error handling for benchctl
//!
//! Provides a unified error type and result type for use across all benchctl components.

/// Result type alias for benchctl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for benchctl
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// The control plane or a local daemon could not be reached
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// The join credential has expired; a fresh one must be supplied
    #[error("Join credential expired: {0}")]
    CredentialExpired(String),

    /// Returning a node to a clean state failed
    #[error("Node reset failed: {0}")]
    ResetFailed(String),

    /// Joining or initializing a node failed for a non-transient reason
    #[error("Join failed: {0}")]
    JoinFailed(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// An external command exited unsuccessfully
    #[error("Command failed: {0}")]
    Command(String),

    /// Invalid request or parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Execution gated by failing preflight checks
    #[error("Preflight failed: {0}")]
    PreflightFailed(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an unreachable error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    /// Create a credential expired error
    pub fn credential_expired(msg: impl Into<String>) -> Self {
        Self::CredentialExpired(msg.into())
    }

    /// Create a reset failed error
    pub fn reset_failed(msg: impl Into<String>) -> Self {
        Self::ResetFailed(msg.into())
    }

    /// Create a join failed error
    pub fn join_failed(msg: impl Into<String>) -> Self {
        Self::JoinFailed(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an already exists error
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a preflight failure
    pub fn preflight_failed(msg: impl Into<String>) -> Self {
        Self::PreflightFailed(msg.into())
    }

    /// Check if this error is transient and worth retrying with backoff.
    ///
    /// Credential expiry is deliberately absent: retrying with the same
    /// credential can never succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unreachable(_) | Error::Timeout(_))
    }

    /// Check if recovery requires operator action
    pub fn requires_operator(&self) -> bool {
        matches!(
            self,
            Error::CredentialExpired(_) | Error::InvalidConfiguration(_) | Error::PreflightFailed(_)
        )
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "configuration",
            Error::Unreachable(_) => "unreachable",
            Error::CredentialExpired(_) => "credential_expired",
            Error::ResetFailed(_) => "reset_failed",
            Error::JoinFailed(_) => "join_failed",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::Timeout(_) => "timeout",
            Error::Command(_) => "command",
            Error::InvalidRequest(_) => "invalid_request",
            Error::PreflightFailed(_) => "preflight",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}

/// Extension trait for adding context to Results
pub trait ErrorContext<T> {
    /// Add context to an error
    fn with_context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let original_error = e.into();
            Error::Other(anyhow::anyhow!("{}: {}", context.into(), original_error))
        })
    }

    fn with_context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let original_error = e.into();
            Error::Other(anyhow::anyhow!("{}: {}", f(), original_error))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("invalid setting");
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert_eq!(err.to_string(), "Configuration error: invalid setting");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::unreachable("api down").is_retryable());
        assert!(Error::timeout("slow").is_retryable());
        assert!(!Error::credential_expired("token").is_retryable());
        assert!(!Error::reset_failed("stuck").is_retryable());
        assert!(!Error::join_failed("bad").is_retryable());
    }

    #[test]
    fn test_operator_errors() {
        assert!(Error::credential_expired("token").requires_operator());
        assert!(Error::preflight_failed("secret").requires_operator());
        assert!(!Error::unreachable("api").requires_operator());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::config("test").category(), "configuration");
        assert_eq!(Error::unreachable("test").category(), "unreachable");
        assert_eq!(Error::credential_expired("test").category(), "credential_expired");
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.with_context("failed to read log").unwrap_err();

        assert!(matches!(err, Error::Other(_)));
        assert!(err.to_string().contains("failed to read log"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_context_fn() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "original error"));

        let err = result
            .with_context_fn(|| format!("operation failed at {}", "location"))
            .unwrap_err();

        assert!(err.to_string().contains("operation failed at location"));
        assert!(err.to_string().contains("original error"));
    }
}
