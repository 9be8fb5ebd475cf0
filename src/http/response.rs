//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tracing::warn;

use super::{HeaderStore, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use spindle::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderStore,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderStore::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Sets a response header, replacing an earlier value for the same name.
    ///
    /// Names or values that would break the wire framing are dropped with a
    /// warning.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Sets a header in place.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Err(e) = self.headers.set(name, value) {
            warn!(header = name, error = %e, "dropping invalid response header");
        }
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type`.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .header("Content-Type", "application/json")
            .body_bytes(body))
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is
    /// written when the handler did not set a `Connection` header itself.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if this response tells the client the connection ends
    /// after it.
    pub fn closes_connection(&self) -> bool {
        if self.headers.contains("connection") {
            self.headers.contains_token("connection", "close")
        } else {
            !self.keep_alive
        }
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>`, except for 1xx, 204 and 304 responses, which
    ///   also never carry a body.
    /// - `Connection: keep-alive` or `Connection: close`, unless already set.
    pub fn into_bytes(mut self) -> BytesMut {
        let bodiless = self.status.is_bodiless();
        if bodiless {
            self.body = Bytes::new();
        }

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.set_header("Content-Type", "text/plain; charset=utf-8");
        }
        if !bodiless {
            let length = self.body.len().to_string();
            self.set_header("Content-Length", &length);
        }
        if !self.headers.contains("connection") {
            let connection = if self.keep_alive {
                "keep-alive"
            } else {
                "close"
            };
            self.set_header("Connection", connection);
        }

        let head = self.headers.as_bytes();
        let mut buf = BytesMut::with_capacity(32 + head.len() + self.body.len());

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // The header store already holds the wire encoding.
        buf.put(head);
        buf.put(&b"\r\n"[..]);
        buf.put(self.body);

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
