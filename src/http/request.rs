//! Parsed HTTP/1.x requests.

use std::fmt::Display;
use std::str::FromStr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::parser::{ParseError, ParseOutcome, RequestParser};
use super::{HeaderStore, Method, Path, Query, Version};

/// Failure to turn a route token into a typed value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("route token `{0}` was not captured")]
    Missing(String),

    #[error("route token `{name}` has invalid value {value:?}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// A fully parsed HTTP/1.x request.
///
/// Requests are produced by the [`RequestParser`] and handed to exactly one
/// handler, which owns it from then on. The body, when present, holds exactly
/// the number of bytes the `Content-Length` header declared.
///
/// # Examples
///
/// ```
/// use spindle::http::{Method, Request};
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path().as_bytes(), b"/hello");
/// assert_eq!(request.query().get("name").as_deref(), Some("world"));
/// assert_eq!(request.headers().get_str("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: Path,
    version: Version,
    headers: HeaderStore,
    body: Option<Bytes>,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: Path,
        version: Version,
        headers: HeaderStore,
        body: Option<Bytes>,
    ) -> Self {
        Self {
            method,
            path,
            version,
            headers,
            body,
        }
    }

    /// Parses one complete request from `buf` with a fresh parser.
    ///
    /// Bytes after the first request are ignored.
    ///
    /// # Errors
    ///
    /// Returns the parser's [`ParseError`], or [`ParseError::Incomplete`]
    /// when `buf` ends before the request does.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        match RequestParser::new().feed(buf) {
            ParseOutcome::Complete(request) => Ok(request),
            ParseOutcome::Incomplete => Err(ParseError::Incomplete),
            ParseOutcome::Malformed(e) => Err(e),
        }
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path, including captured route tokens.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn path_mut(&mut self) -> &mut Path {
        &mut self.path
    }

    /// Returns the query string of the request target.
    pub fn query(&self) -> &Query {
        self.path.query()
    }

    /// Returns the value the router captured for the route token `name`.
    ///
    /// For a route registered as `/users/:id`, `token("id")` on a request
    /// for `/users/42` yields `"42"`.
    pub fn token(&self, name: &str) -> Option<&str> {
        self.path.token(name)
    }

    /// Parses the route token `name` into `T`.
    ///
    /// ```
    /// # use spindle::http::{ExtractError, Request};
    /// # let req = Request::parse(b"GET /users/42 HTTP/1.1\r\n\r\n").unwrap();
    /// // Without routing no token was captured.
    /// assert!(matches!(req.extract::<u32>("id"), Err(ExtractError::Missing(_))));
    /// ```
    ///
    /// # Errors
    ///
    /// [`ExtractError::Missing`] when the router captured no such token and
    /// [`ExtractError::Invalid`] when its value does not parse.
    pub fn extract<T>(&self, name: &str) -> Result<T, ExtractError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self
            .token(name)
            .ok_or_else(|| ExtractError::Missing(name.to_owned()))?;
        value.parse().map_err(|e: T::Err| ExtractError::Invalid {
            name: name.to_owned(),
            value: value.to_owned(),
            reason: e.to_string(),
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    /// Returns the request body, if a `Content-Length` was declared.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Consumes the request and returns its body.
    pub fn into_body(self) -> Option<Bytes> {
        self.body
    }

    /// Returns the value of the `Content-Length` header, if present and valid.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get_str("content-length")?.parse().ok()
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection` lists `keep-alive`. A `close` token always wins.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.contains_token("connection", "close") {
            false
        } else if self.headers.contains_token("connection", "keep-alive") {
            true
        } else {
            self.version == Version::Http11
        }
    }

    /// Deserializes the body as JSON.
    ///
    /// A request without a body is treated as an empty document, which
    /// fails for every type that needs input.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.body.as_deref().unwrap_or_default())
    }

    /// Exposes an `application/x-www-form-urlencoded` body as a [`Query`].
    pub fn form(&self) -> Query {
        self.body.clone().map(Query::new).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn parse_simple_get() {
        let req = Request::parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.path().as_bytes(), b"/");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.headers().get_str("host"), Some("localhost"));
        assert!(req.body().is_none());
    }

    #[test]
    fn incomplete_request() {
        assert_eq!(
            Request::parse(b"GET / HTTP/1.1\r\nHost:").unwrap_err(),
            ParseError::Incomplete
        );
    }

    #[test]
    fn keep_alive_http11_default() {
        let req = Request::parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
    }

    #[test]
    fn keep_alive_http10_requires_opt_in() {
        let req = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());

        let req = Request::parse(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
    }

    #[test]
    fn connection_close() {
        let req =
            Request::parse(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn connection_tokens_are_split() {
        let req = Request::parse(b"GET / HTTP/1.1\r\nConnection: close, TE\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());

        let req =
            Request::parse(b"GET / HTTP/1.0\r\nConnection: TE , Keep-Alive\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());

        let req = Request::parse(
            b"GET / HTTP/1.1\r\nConnection: keep-alive\r\nConnection: close\r\n\r\n",
        )
        .unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn extract_typed_tokens() {
        let mut req = Request::parse(b"GET /users/42/x HTTP/1.1\r\n\r\n").unwrap();
        req.path_mut().insert_token("id".into(), "42".into());
        req.path_mut().insert_token("slug".into(), "x".into());

        assert_eq!(req.extract::<u32>("id"), Ok(42));
        assert_eq!(req.extract::<String>("slug").as_deref(), Ok("x"));
        assert_eq!(
            req.extract::<u8>("missing"),
            Err(ExtractError::Missing("missing".into()))
        );
        match req.extract::<u32>("slug") {
            Err(ExtractError::Invalid { name, value, .. }) => {
                assert_eq!(name, "slug");
                assert_eq!(value, "x");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn content_length() {
        let req = Request::parse(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello").unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(req.into_body().as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn json_body() {
        #[derive(Deserialize)]
        struct Greeting {
            name: String,
            times: u32,
        }

        let req = Request::parse(
            b"POST /greet HTTP/1.1\r\nContent-Length: 26\r\n\r\n{\"name\":\"ada\",\"times\":3}  ",
        )
        .unwrap();
        let greeting: Greeting = req.json().unwrap();
        assert_eq!(greeting.name, "ada");
        assert_eq!(greeting.times, 3);
    }

    #[test]
    fn json_without_body_fails() {
        let req = Request::parse(b"POST / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.json::<serde_json::Value>().is_err());
    }

    #[test]
    fn form_body() {
        let req = Request::parse(
            b"POST /login HTTP/1.1\r\nContent-Length: 22\r\n\r\nuser=ada&pass=p%40ss+1",
        )
        .unwrap();
        let form = req.form();
        assert_eq!(form.get("user").as_deref(), Some("ada"));
        assert_eq!(form.get("pass").as_deref(), Some("p@ss 1"));
    }
}
