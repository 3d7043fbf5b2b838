//! Configuration management for the vhost-proxy application.
//!
//! The configuration file is read once at startup. Files ending in `.json`
//! are parsed with `serde_json`, so any valid JSON document is accepted
//! (tab indentation and surrogate-pair escapes included). Every other file
//! is parsed as YAML with `serde_yaml`.

use crate::error::{ProxyError, Result};
use crate::routes::RouteDefinition;
use crate::upstream::UpstreamTimeouts;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default listen address for plaintext HTTP.
pub const DEFAULT_HTTP_LISTEN: &str = "0.0.0.0:80";

/// Default listen address when TLS is terminated.
pub const DEFAULT_HTTPS_LISTEN: &str = "0.0.0.0:443";

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port to listen on. Unset selects the default for the
    /// transport mode.
    pub listen: Option<String>,

    /// Worker threads for the proxy service (0 = pingora default).
    pub threads: usize,

    /// Upstream connect timeout in seconds.
    pub connect_timeout: u64,

    /// Upstream read timeout in seconds.
    pub read_timeout: u64,

    /// Upstream write timeout in seconds.
    pub write_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            threads: 0,
            connect_timeout: 10,
            read_timeout: 60,
            write_timeout: 60,
        }
    }
}

impl ServerConfig {
    /// Returns the address to bind, falling back to the mode default.
    pub fn effective_listen(&self, tls_enabled: bool) -> String {
        match self.listen.as_deref() {
            Some(addr) if !addr.is_empty() => addr.to_string(),
            _ if tls_enabled => DEFAULT_HTTPS_LISTEN.to_string(),
            _ => DEFAULT_HTTP_LISTEN.to_string(),
        }
    }

    /// Deadlines applied to every upstream connection.
    pub fn upstream_timeouts(&self) -> UpstreamTimeouts {
        UpstreamTimeouts {
            connect: Duration::from_secs(self.connect_timeout),
            read: Duration::from_secs(self.read_timeout),
            write: Duration::from_secs(self.write_timeout),
        }
    }
}

/// TLS termination configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    /// Terminate TLS on the listener.
    pub enabled: bool,

    /// Path to the PEM certificate chain.
    pub cert: String,

    /// Path to the PEM private key.
    pub key: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert: "cert.pem".to_string(),
            key: "key.pem".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,

    /// Output destination: stdout, stderr, or file path.
    pub output: String,

    /// Log format.
    pub format: LogFormat,

    /// Include target (module path) in logs.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "stdout".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Host-to-upstream routes, in declaration order.
    pub routes: Vec<RouteDefinition>,

    /// Server configuration.
    pub server: ServerConfig,

    /// TLS termination configuration.
    pub tls: TlsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a JSON or YAML file, chosen by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProxyError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_str_contents(&contents)
        }
    }

    /// Parses and validates YAML configuration text.
    pub fn from_str_contents(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).map_err(|e| ProxyError::config_parse(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parses and validates JSON configuration text.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(contents).map_err(|e| ProxyError::config_parse(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Target URLs are checked later, when the route table is built.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.server.listen.as_deref(), Some("")) {
            return Err(ProxyError::config_validation(
                "Server listen address cannot be empty",
            ));
        }

        for (index, route) in self.routes.iter().enumerate() {
            if route.host.is_empty() {
                return Err(ProxyError::config_validation(format!(
                    "Route #{} has an empty host",
                    index
                )));
            }
        }

        if self.tls.enabled && (self.tls.cert.is_empty() || self.tls.key.is_empty()) {
            return Err(ProxyError::config_validation(
                "TLS requires both a certificate and a key path",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ProxyError::config_validation(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }
}
