//! Incremental HTTP/1.x request parser.
//!
//! [`RequestParser`] is fed whatever the socket produced and keeps enough
//! state to pick up where it stopped. It walks five stages in a fixed order:
//! method, target, request-line terminator, headers and body. Each stage is
//! attempted only once the previous one resolved, so a request split across
//! any number of reads parses the same as one delivered whole.
//!
//! Bytes past the end of a request stay buffered. After a
//! [`ParseOutcome::Complete`], calling [`RequestParser::feed`] with an empty
//! chunk parses the next pipelined request from those leftovers.

use bytes::{Buf, BytesMut};
use memchr::{memchr, memchr2};
use thiserror::Error;

use super::{HeaderStore, Method, Path, Request, Version};

/// Nothing is attempted before this many bytes are buffered: `GET / X\r\n`
/// is the shortest request line that can possibly be well formed.
pub const MIN_REQUEST_LEN: usize = 7;

/// Longest method token accepted before the parser gives up on a request line.
pub const MAX_METHOD_LEN: usize = 32;

/// Structural failures. Any of these poisons the parser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid request method")]
    InvalidMethod,

    #[error("invalid request target")]
    InvalidTarget,

    #[error("request line is not terminated by CRLF")]
    MissingCarriageReturn,

    #[error("unsupported HTTP version")]
    InvalidVersion,

    #[error("malformed header line")]
    InvalidHeader,

    #[error("invalid Content-Length value")]
    InvalidContentLength,

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("declared body of {declared} bytes exceeds the limit of {limit} bytes")]
    BodyTooLarge { declared: usize, limit: usize },

    #[error("input ended in the middle of a request")]
    Incomplete,

    #[error("parser was fed after a malformed request")]
    Poisoned,
}

/// Result of feeding bytes to a [`RequestParser`].
#[derive(Debug)]
pub enum ParseOutcome {
    /// More bytes are needed.
    Incomplete,
    /// A full request was read. Leftover bytes may hold the next one.
    Complete(Request),
    /// The input is not a well-formed request; the connection should close.
    Malformed(ParseError),
}

/// Size limits enforced while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    /// Upper bound for request line plus headers.
    pub max_head_bytes: usize,
    /// Upper bound for a declared `Content-Length`.
    pub max_body_bytes: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

struct RequestLine {
    method: Method,
    path: Path,
    version: Version,
}

enum Stage {
    Method,
    Target {
        method: Method,
    },
    LineEnd {
        method: Method,
        path: Path,
    },
    Headers {
        line: RequestLine,
        // Bytes of `buf` already validated as complete header lines.
        scanned: usize,
        content_length: Option<usize>,
    },
    Body {
        line: RequestLine,
        headers: HeaderStore,
        body: BytesMut,
        length: usize,
    },
}

enum Step {
    Next(Stage),
    Wait(Stage),
    Done(Request),
}

/// Resumable request parser; one per connection.
///
/// # Examples
///
/// ```
/// use spindle::http::{Method, ParseOutcome, RequestParser};
///
/// let mut parser = RequestParser::new();
/// assert!(matches!(parser.feed(b"POST /echo HTTP/1.1\r\nContent-Le"), ParseOutcome::Incomplete));
/// assert!(matches!(parser.feed(b"ngth: 5\r\n\r\nhel"), ParseOutcome::Incomplete));
///
/// let ParseOutcome::Complete(request) = parser.feed(b"lo") else { panic!() };
/// assert_eq!(request.method(), &Method::Post);
/// assert_eq!(request.body().map(|b| &b[..]), Some(&b"hello"[..]));
/// ```
pub struct RequestParser {
    buf: BytesMut,
    stage: Stage,
    limits: ParserLimits,
    // Head bytes already consumed for the request in progress.
    head_len: usize,
    correct: bool,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    /// Creates a parser with default [`ParserLimits`].
    pub fn new() -> Self {
        Self::with_limits(ParserLimits::default())
    }

    pub fn with_limits(limits: ParserLimits) -> Self {
        Self {
            buf: BytesMut::new(),
            stage: Stage::Method,
            limits,
            head_len: 0,
            correct: true,
        }
    }

    /// Feeds the next chunk of bytes and advances as far as possible.
    ///
    /// Pass an empty chunk to continue with bytes left over from a previous
    /// call, which is how pipelined requests are drained.
    pub fn feed(&mut self, chunk: &[u8]) -> ParseOutcome {
        if !self.correct {
            return ParseOutcome::Malformed(ParseError::Poisoned);
        }

        let mut chunk = chunk;
        if self.buf.is_empty() {
            // Body bytes go straight from the chunk into the body buffer.
            if let Stage::Body { body, length, .. } = &mut self.stage {
                let n = (*length - body.len()).min(chunk.len());
                body.extend_from_slice(&chunk[..n]);
                chunk = &chunk[n..];
            }
        }
        self.buf.extend_from_slice(chunk);

        match self.advance() {
            Ok(Some(request)) => ParseOutcome::Complete(request),
            Ok(None) => ParseOutcome::Incomplete,
            Err(e) => {
                self.correct = false;
                ParseOutcome::Malformed(e)
            }
        }
    }

    /// Returns `true` when bytes past the last complete request are buffered.
    pub fn has_leftovers(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Returns `true` when no request is in progress and nothing is buffered.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && matches!(self.stage, Stage::Method)
    }

    /// Returns `true` if the parser saw malformed input and refuses more.
    pub fn is_poisoned(&self) -> bool {
        !self.correct
    }

    /// Hands over all buffered, unparsed bytes.
    ///
    /// Used when the connection switches protocol (WebSocket) and the bytes
    /// following the upgrade request belong to the new protocol.
    pub fn take_leftovers(&mut self) -> BytesMut {
        self.buf.split()
    }

    /// Drops any partial request and leftovers and clears the poisoned flag.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.stage = Stage::Method;
        self.head_len = 0;
        self.correct = true;
    }

    fn advance(&mut self) -> Result<Option<Request>, ParseError> {
        loop {
            let stage = std::mem::replace(&mut self.stage, Stage::Method);
            match self.step(stage)? {
                Step::Next(stage) => self.stage = stage,
                Step::Wait(stage) => {
                    self.stage = stage;
                    return Ok(None);
                }
                Step::Done(request) => {
                    self.head_len = 0;
                    return Ok(Some(request));
                }
            }
        }
    }

    fn step(&mut self, stage: Stage) -> Result<Step, ParseError> {
        match stage {
            Stage::Method => self.read_method(),
            Stage::Target { method } => self.read_target(method),
            Stage::LineEnd { method, path } => self.read_line_end(method, path),
            Stage::Headers {
                line,
                scanned,
                content_length,
            } => self.read_headers(line, scanned, content_length),
            Stage::Body {
                line,
                headers,
                body,
                length,
            } => Ok(self.read_body(line, headers, body, length)),
        }
    }

    fn read_method(&mut self) -> Result<Step, ParseError> {
        if self.buf.len() < MIN_REQUEST_LEN {
            return Ok(Step::Wait(Stage::Method));
        }

        let Some(pos) = memchr2(b' ', b'\n', &self.buf) else {
            if self.buf.len() > MAX_METHOD_LEN {
                return Err(ParseError::InvalidMethod);
            }
            return Ok(Step::Wait(Stage::Method));
        };
        if pos == 0 || pos > MAX_METHOD_LEN || self.buf[pos] != b' ' {
            return Err(ParseError::InvalidMethod);
        }

        let method = Method::from_bytes(&self.buf[..pos]).ok_or(ParseError::InvalidMethod)?;
        self.consume_head(pos + 1);
        Ok(Step::Next(Stage::Target { method }))
    }

    fn read_target(&mut self, method: Method) -> Result<Step, ParseError> {
        let Some(pos) = memchr2(b' ', b'\n', &self.buf) else {
            self.check_head(self.buf.len())?;
            return Ok(Step::Wait(Stage::Target { method }));
        };
        if pos == 0 || self.buf[pos] != b' ' {
            return Err(ParseError::InvalidTarget);
        }
        self.check_head(pos + 1)?;

        let target = self.consume_head(pos + 1);
        let target = target.freeze().slice(..pos);
        Ok(Step::Next(Stage::LineEnd {
            method,
            path: Path::from_target(target),
        }))
    }

    fn read_line_end(&mut self, method: Method, path: Path) -> Result<Step, ParseError> {
        let Some(lf) = memchr(b'\n', &self.buf) else {
            self.check_head(self.buf.len())?;
            return Ok(Step::Wait(Stage::LineEnd { method, path }));
        };
        if lf == 0 || self.buf[lf - 1] != b'\r' {
            return Err(ParseError::MissingCarriageReturn);
        }
        let version = Version::from_bytes(&self.buf[..lf - 1]).ok_or(ParseError::InvalidVersion)?;
        self.consume_head(lf + 1);

        Ok(Step::Next(Stage::Headers {
            line: RequestLine {
                method,
                path,
                version,
            },
            scanned: 0,
            content_length: None,
        }))
    }

    fn read_headers(
        &mut self,
        line: RequestLine,
        mut scanned: usize,
        mut content_length: Option<usize>,
    ) -> Result<Step, ParseError> {
        loop {
            let Some(rel) = memchr(b'\n', &self.buf[scanned..]) else {
                self.check_head(self.buf.len())?;
                return Ok(Step::Wait(Stage::Headers {
                    line,
                    scanned,
                    content_length,
                }));
            };
            let lf = scanned + rel;
            if lf == scanned || self.buf[lf - 1] != b'\r' {
                return Err(ParseError::InvalidHeader);
            }
            self.check_head(lf + 1)?;

            let header_line = &self.buf[scanned..lf - 1];
            if header_line.is_empty() {
                // Blank line: the block before it becomes the header store.
                let headers = HeaderStore::from_wire(&self.buf[..scanned]);
                self.consume_head(lf + 1);
                return Ok(match content_length {
                    Some(length) => Step::Next(Stage::Body {
                        line,
                        headers,
                        body: BytesMut::with_capacity(length),
                        length,
                    }),
                    None => Step::Done(Request::new(
                        line.method,
                        line.path,
                        line.version,
                        headers,
                        None,
                    )),
                });
            }

            if let Some(declared) = inspect_header(header_line)? {
                if content_length.is_some_and(|known| known != declared) {
                    return Err(ParseError::InvalidContentLength);
                }
                if declared > self.limits.max_body_bytes {
                    return Err(ParseError::BodyTooLarge {
                        declared,
                        limit: self.limits.max_body_bytes,
                    });
                }
                content_length = Some(declared);
            }
            scanned = lf + 1;
        }
    }

    fn read_body(
        &mut self,
        line: RequestLine,
        headers: HeaderStore,
        mut body: BytesMut,
        length: usize,
    ) -> Step {
        let n = (length - body.len()).min(self.buf.len());
        body.extend_from_slice(&self.buf[..n]);
        self.buf.advance(n);

        if body.len() < length {
            return Step::Wait(Stage::Body {
                line,
                headers,
                body,
                length,
            });
        }
        Step::Done(Request::new(
            line.method,
            line.path,
            line.version,
            headers,
            Some(body.freeze()),
        ))
    }

    fn check_head(&self, pending: usize) -> Result<(), ParseError> {
        if self.head_len + pending > self.limits.max_head_bytes {
            return Err(ParseError::HeadTooLarge {
                limit: self.limits.max_head_bytes,
            });
        }
        Ok(())
    }

    fn consume_head(&mut self, n: usize) -> BytesMut {
        self.head_len += n;
        self.buf.split_to(n)
    }
}

// Validates one `Key: Value` line and returns the Content-Length it declares.
fn inspect_header(line: &[u8]) -> Result<Option<usize>, ParseError> {
    let colon = memchr(b':', line).ok_or(ParseError::InvalidHeader)?;
    let name = &line[..colon];
    if name.is_empty()
        || name
            .iter()
            .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(ParseError::InvalidHeader);
    }
    if !name.eq_ignore_ascii_case(b"content-length") {
        return Ok(None);
    }

    let value = line[colon + 1..].trim_ascii();
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidContentLength);
    }
    std::str::from_utf8(value)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .map(Some)
        .ok_or(ParseError::InvalidContentLength)
}
