//! Server configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ServerError;
use crate::http::parser::ParserLimits;

/// What a connection does when a handler returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// Log the error and close the connection.
    #[default]
    Close,
    /// Log the error and keep serving the connection.
    Ignore,
}

/// Tunables for a [`Server`](super::Server) and the connections it serves.
///
/// Every field has a default, so a JSON document only needs to name what it
/// overrides:
///
/// ```
/// use spindle::server::ServerConfig;
///
/// let config = ServerConfig::from_json(r#"{ "port": 9000 }"#).unwrap();
/// assert_eq!(config.port, 9000);
/// assert_eq!(config.hostname, "0.0.0.0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    /// Size of the fixed per-connection receive buffer.
    pub receive_buffer_size: usize,
    /// Limit for a request line plus headers.
    pub max_header_bytes: usize,
    /// Limit for a declared `Content-Length`.
    pub max_body_bytes: usize,
    /// Limit for a reassembled WebSocket message.
    pub max_websocket_message: usize,
    pub handler_error_policy: HandlerErrorPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_owned(),
            port: 8080,
            receive_buffer_size: 64 * 1024,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 8 * 1024 * 1024,
            max_websocket_message: 16 * 1024 * 1024,
            handler_error_policy: HandlerErrorPolicy::Close,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&raw)?)
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_max_header_bytes(mut self, limit: usize) -> Self {
        self.max_header_bytes = limit;
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    #[must_use]
    pub fn with_max_websocket_message(mut self, limit: usize) -> Self {
        self.max_websocket_message = limit;
        self
    }

    #[must_use]
    pub fn with_handler_error_policy(mut self, policy: HandlerErrorPolicy) -> Self {
        self.handler_error_policy = policy;
        self
    }

    /// `hostname:port`, as handed to address resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn parser_limits(&self) -> ParserLimits {
        ParserLimits {
            max_head_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }

    /// Rejects configurations no connection could be served with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.receive_buffer_size == 0 {
            return Err(ServerError::InvalidBuffer);
        }
        Ok(())
    }
}
