//! Error types for the vhost-proxy application.
//!
//! Startup errors (configuration, route table, server setup) are fatal and
//! surface through [`ProxyError`]. Per-request failures never use this type;
//! they stay inside the request path as Pingora errors and become HTTP
//! responses.

use thiserror::Error;

/// Main error type for the vhost-proxy application.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration file could not be found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// A route's target is not an absolute http(s) URL.
    #[error("Invalid target URL {target:?} for host {host}: {reason}")]
    InvalidTarget {
        host: String,
        target: String,
        reason: String,
    },

    /// The server front could not be set up.
    #[error("Server setup failed: {message}")]
    Server { message: String },

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Creates a new configuration parse error.
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Creates a new configuration validation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Creates a new invalid target error.
    pub fn invalid_target(
        host: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTarget {
            host: host.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new server setup error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }
}

/// Result type alias using ProxyError.
pub type Result<T> = std::result::Result<T, ProxyError>;
