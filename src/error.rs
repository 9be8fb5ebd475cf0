//! Crate-wide error type.
//!
//! Each layer has its own error enum; [`Error`] wraps all of them so
//! applications can use a single `?`-friendly type.

use thiserror::Error;

use crate::http::{ExtractError, HeaderError, ParseError};
use crate::server::{ConnectionError, ServerError};
use crate::websocket::{FrameError, UpgradeError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Upgrade(#[from] UpgradeError),

    #[error("websocket frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn read_config(path: &str) -> Result<crate::ServerConfig> {
        crate::ServerConfig::from_json_file(path)
    }

    #[test]
    fn layer_errors_convert() {
        let err: Error = ParseError::InvalidMethod.into();
        assert!(matches!(err, Error::Parse(ParseError::InvalidMethod)));

        let err: Error = ConnectionError::Closed.into();
        assert_eq!(err.to_string(), "connection is closed");
    }

    #[test]
    fn missing_config_file_is_io() {
        assert!(matches!(
            read_config("/definitely/not/here.json"),
            Err(Error::Io(_))
        ));
    }
}
