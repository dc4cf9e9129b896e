//! Error types for the AppSec engine crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppsecError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppsecError {
    /// Malformed published data, malformed update document or a
    /// non-map top-level shape. `path` points at the offending node.
    #[error("Invalid input at {path}: {reason}")]
    InvalidInput { path: String, reason: String },
    #[error("Evaluation timeout exceeded")]
    Timeout,
    #[error("Subscriber failure: {0}")]
    SubscriberFailure(String),
    #[error("Rule compilation error: {0}")]
    RuleCompilation(String),
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),
    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),
    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("JSON parsing error: {0}")]
    Json(String),
    #[error("YAML parsing error: {0}")]
    Yaml(String),
}

impl AppsecError {
    pub fn invalid_input(path: impl Into<String>, reason: impl Into<String>) -> Self {
        AppsecError::InvalidInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AppsecError::Timeout)
    }
}

impl From<std::io::Error> for AppsecError {
    fn from(err: std::io::Error) -> Self {
        AppsecError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppsecError {
    fn from(err: serde_json::Error) -> Self {
        AppsecError::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppsecError {
    fn from(err: serde_yaml::Error) -> Self {
        AppsecError::Yaml(err.to_string())
    }
}
