//! Error types for coordkit

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Node Errors ===
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // === Ensemble Errors ===
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Coordination actor stopped")]
    Shutdown,

    // === Discovery Errors ===
    #[error("Weight refresh failed for {instance}: {reason}")]
    RefreshFailed { instance: String, reason: String },

    #[error("Invalid instance record at {path}: {reason}")]
    InvalidRecord { path: String, reason: String },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    // === Conversion Errors ===
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::ConnectionError(_))
    }

    /// Stable name used on the wire between the ensemble server and its clients
    pub fn kind(&self) -> &'static str {
        match self {
            Error::PathNotFound(_) => "path_not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::NotEmpty(_) => "not_empty",
            Error::InvalidPath(_) => "invalid_path",
            Error::ConnectionError(_) => "connection_error",
            Error::Timeout(_) => "timeout",
            Error::Shutdown => "shutdown",
            Error::RefreshFailed { .. } => "refresh_failed",
            Error::InvalidRecord { .. } => "invalid_record",
            Error::InvalidConfig(_) | Error::Config(_) => "invalid_config",
            _ => "internal",
        }
    }

    /// Message without the variant prefix; pairs with [`Error::from_kind`]
    pub fn detail(&self) -> String {
        match self {
            Error::PathNotFound(m)
            | Error::AlreadyExists(m)
            | Error::NotEmpty(m)
            | Error::InvalidPath(m)
            | Error::ConnectionError(m)
            | Error::Timeout(m)
            | Error::InvalidConfig(m)
            | Error::Internal(m) => m.clone(),
            Error::RefreshFailed { instance, reason } => format!("{}: {}", instance, reason),
            Error::InvalidRecord { path, reason } => format!("{}: {}", path, reason),
            other => other.to_string(),
        }
    }

    /// Rebuild an error from its wire kind and message
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "path_not_found" => Error::PathNotFound(message),
            "already_exists" => Error::AlreadyExists(message),
            "not_empty" => Error::NotEmpty(message),
            "invalid_path" => Error::InvalidPath(message),
            "connection_error" => Error::ConnectionError(message),
            "timeout" => Error::Timeout(message),
            "invalid_config" => Error::InvalidConfig(message),
            "shutdown" => Error::Shutdown,
            "refresh_failed" => {
                let (instance, reason) = split_detail(&message);
                Error::RefreshFailed { instance, reason }
            }
            "invalid_record" => {
                let (path, reason) = split_detail(&message);
                Error::InvalidRecord { path, reason }
            }
            _ => Error::Internal(message),
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::PathNotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) | Error::NotEmpty(_) => StatusCode::CONFLICT,
            Error::InvalidPath(_) | Error::InvalidConfig(_) | Error::InvalidRecord { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::ConnectionError(_) | Error::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Split a `subject: reason` detail; a detail without a subject is all reason
fn split_detail(message: &str) -> (String, String) {
    match message.split_once(": ") {
        Some((subject, reason)) => (subject.to_string(), reason.to_string()),
        None => (String::new(), message.to_string()),
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::ConnectionError(e.to_string())
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
