//! The HTTP side of a WebSocket upgrade.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::http::{Method, Request, Response, StatusCode};
use crate::server::ConnectionError;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Reasons a request cannot be upgraded.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("websocket upgrade requires GET, got {0}")]
    Method(Method),

    #[error("missing or invalid Upgrade header")]
    MissingUpgrade,

    #[error("Connection header does not contain the upgrade token")]
    MissingConnectionUpgrade,

    #[error("missing Sec-WebSocket-Key")]
    MissingKey,

    #[error("missing or unparsable Sec-WebSocket-Version")]
    InvalidVersion,

    #[error("failed to send handshake response: {0}")]
    Send(#[from] ConnectionError),
}

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    key: String,
    version: u32,
}

impl Handshake {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The `Sec-WebSocket-Accept` value for this handshake.
    pub fn accept(&self) -> String {
        accept_key(&self.key)
    }

    /// The `101 Switching Protocols` response completing the handshake.
    ///
    /// Clients asking for a version newer than 13 get the accept value under
    /// `Sec-WebSocket-Key`, together with `Sec-WebSocket-Version: 13`.
    pub fn response(&self) -> Response {
        let response = Response::new(StatusCode::SwitchingProtocols)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade");

        if self.version > 13 {
            response
                .header("Sec-WebSocket-Key", &self.accept())
                .header("Sec-WebSocket-Version", "13")
        } else {
            response.header("Sec-WebSocket-Accept", &self.accept())
        }
    }
}

/// Computes `base64(sha1(key + GUID))`.
///
/// ```
/// use spindle::websocket::accept_key;
///
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(GUID.as_bytes());
    STANDARD.encode(sha.finalize())
}

/// Returns `true` if `request` asks for a WebSocket upgrade at all.
pub fn is_upgrade_request(request: &Request) -> bool {
    request
        .headers()
        .get("upgrade")
        .is_some_and(|v| v.trim_ascii().eq_ignore_ascii_case(b"websocket"))
}

/// Checks every handshake requirement on `request`.
pub fn validate(request: &Request) -> Result<Handshake, UpgradeError> {
    if request.method() != &Method::Get {
        return Err(UpgradeError::Method(request.method().clone()));
    }
    if !is_upgrade_request(request) {
        return Err(UpgradeError::MissingUpgrade);
    }

    let headers = request.headers();
    if !headers.contains_token("connection", "upgrade") {
        return Err(UpgradeError::MissingConnectionUpgrade);
    }

    let key = headers
        .get_str("sec-websocket-key")
        .filter(|k| !k.is_empty())
        .ok_or(UpgradeError::MissingKey)?;
    let version = headers
        .get_str("sec-websocket-version")
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or(UpgradeError::InvalidVersion)?;

    Ok(Handshake {
        key: key.to_owned(),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(extra: &str) -> Request {
        let raw = format!(
            "GET /chat HTTP/1.1\r\nHost: server.example.com\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n{extra}\r\n"
        );
        Request::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn rfc_accept_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn valid_handshake_response() {
        let handshake = validate(&upgrade_request("Sec-WebSocket-Version: 13\r\n")).unwrap();
        assert_eq!(handshake.version(), 13);

        let text = String::from_utf8(handshake.response().into_bytes().to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn newer_version_gets_key_and_version_headers() {
        let handshake = validate(&upgrade_request("Sec-WebSocket-Version: 14\r\n")).unwrap();
        let text = String::from_utf8(handshake.response().into_bytes().to_vec()).unwrap();
        assert!(text.contains("Sec-WebSocket-Key: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(!text.contains("Sec-WebSocket-Accept"));
    }

    #[test]
    fn upgrade_value_is_case_insensitive() {
        let raw = b"GET / HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: upgrade\r\nSec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(validate(&Request::parse(raw).unwrap()).is_ok());
    }

    #[test]
    fn missing_pieces_are_rejected() {
        assert!(matches!(
            validate(&upgrade_request("")),
            Err(UpgradeError::InvalidVersion)
        ));
        assert!(matches!(
            validate(&upgrade_request("Sec-WebSocket-Version: thirteen\r\n")),
            Err(UpgradeError::InvalidVersion)
        ));

        let no_key = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(
            validate(&Request::parse(no_key).unwrap()),
            Err(UpgradeError::MissingKey)
        ));

        let no_token = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: keep-alive\r\nSec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(
            validate(&Request::parse(no_token).unwrap()),
            Err(UpgradeError::MissingConnectionUpgrade)
        ));

        let plain = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(matches!(
            validate(&Request::parse(plain).unwrap()),
            Err(UpgradeError::MissingUpgrade)
        ));

        let post = b"POST / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert!(matches!(
            validate(&Request::parse(post).unwrap()),
            Err(UpgradeError::Method(Method::Post))
        ));
    }
}
