//! Compact header store: one serialized buffer plus a hash→offset index.
//!
//! Headers are kept exactly as they travel on the wire, as a run of
//! `Key: Value\r\n` lines. The index maps a hash of the lower-cased key to the
//! offset of its line, so repeated lookups skip the scan. Headers that arrive
//! from the parser are not indexed up front; the first lookup that misses the
//! index scans the buffer once and indexes every key it walks past.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};

use memchr::memchr;
use thiserror::Error;

/// Errors produced when inserting a header.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header name is empty")]
    EmptyName,

    #[error("header name contains a separator, whitespace or control byte")]
    InvalidName,

    #[error("header value contains CR or LF")]
    InvalidValue,
}

/// A case-insensitive HTTP header store backed by its own wire encoding.
///
/// # Examples
///
/// ```
/// use spindle::http::HeaderStore;
///
/// let mut headers = HeaderStore::new();
/// headers.set("Content-Type", "text/html").unwrap();
/// headers.set("X-Custom", "first").unwrap();
/// headers.set("x-custom", "second").unwrap();
///
/// assert_eq!(headers.get_str("content-type"), Some("text/html"));
/// assert_eq!(headers.get_str("X-Custom"), Some("second"));
/// assert_eq!(headers.as_bytes(), b"Content-Type: text/html\r\nX-Custom: second\r\n");
/// ```
#[derive(Default)]
pub struct HeaderStore {
    serialized: Vec<u8>,
    // Behind a mutex so that `get(&self)` can populate it.
    index: Mutex<HashMap<u64, usize>>,
}

// Byte positions of one `Key: Value\r\n` line inside the serialized buffer.
#[derive(Debug, Clone)]
struct Line {
    start: usize,
    key_end: usize,
    // Trimmed value.
    value: Range<usize>,
    // Position of the terminating CR (or LF when CR is missing).
    value_limit: usize,
    // One past the LF.
    end: usize,
}

impl HeaderStore {
    /// Creates an empty header store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store over an already serialized header block.
    ///
    /// The block must consist of complete `Key: Value\r\n` lines, as produced
    /// by the request parser. No index entries are created.
    pub fn from_wire(block: &[u8]) -> Self {
        Self {
            serialized: block.to_vec(),
            index: Mutex::default(),
        }
    }

    /// Returns the value of the first header named `key` (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        let key = key.as_bytes();
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        locate(&self.serialized, &mut index, key).map(|line| &self.serialized[line.value])
    }

    /// Returns the value of `key` as UTF-8, or `None` if absent or not UTF-8.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Returns every value stored under `key`, in wire order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        lines(&self.serialized)
            .filter(move |line| key_of(&self.serialized, line).eq_ignore_ascii_case(key.as_bytes()))
            .map(|line| &self.serialized[line.value])
    }

    /// Returns `true` if any `key` header lists `token` among its
    /// comma-separated values, ignoring ASCII case.
    pub fn contains_token(&self, key: &str, token: &str) -> bool {
        self.get_all(key).any(|value| {
            value
                .split(|&b| b == b',')
                .any(|item| item.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
        })
    }

    /// Returns `true` if at least one header named `key` exists.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key` to `value`.
    ///
    /// An existing header has its value replaced in place; a new header is
    /// appended to the end of the buffer.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] when the name or value would break the wire
    /// framing (CR/LF, `:` in names, empty names).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), HeaderError> {
        self.set_bytes(key.as_bytes(), value.as_bytes())
    }

    /// Byte-oriented variant of [`set`](Self::set).
    pub fn set_bytes(&mut self, key: &[u8], value: &[u8]) -> Result<(), HeaderError> {
        validate_name(key)?;
        if value.iter().any(|&b| b == b'\r' || b == b'\n') {
            return Err(HeaderError::InvalidValue);
        }

        let index = self.index.get_mut().unwrap_or_else(PoisonError::into_inner);
        match locate(&self.serialized, index, key) {
            Some(line) => {
                let old_len = line.value_limit - line.value.start;
                self.serialized
                    .splice(line.value.start..line.value_limit, value.iter().copied());
                let delta = value.len() as isize - old_len as isize;
                if delta != 0 {
                    for offset in index.values_mut() {
                        if *offset > line.start {
                            *offset = offset.wrapping_add_signed(delta);
                        }
                    }
                }
            }
            None => {
                let offset = self.serialized.len();
                self.serialized.reserve(key.len() + value.len() + 4);
                self.serialized.extend_from_slice(key);
                self.serialized.extend_from_slice(b": ");
                self.serialized.extend_from_slice(value);
                self.serialized.extend_from_slice(b"\r\n");
                index.insert(key_hash(key), offset);
            }
        }
        Ok(())
    }

    /// Removes every header named `key`, both from the index and the buffer.
    ///
    /// Returns `true` if anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let key = key.as_bytes();
        let index = self.index.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;

        while let Some(line) = locate(&self.serialized, index, key) {
            let len = line.end - line.start;
            self.serialized.drain(line.start..line.end);
            index.retain(|_, offset| *offset != line.start);
            for offset in index.values_mut() {
                if *offset > line.start {
                    *offset -= len;
                }
            }
            removed = true;
        }
        removed
    }

    /// Returns the number of header lines (not unique names).
    pub fn len(&self) -> usize {
        lines(&self.serialized).count()
    }

    /// Returns `true` if no headers are stored.
    pub fn is_empty(&self) -> bool {
        self.serialized.is_empty()
    }

    /// Returns an iterator over `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        lines(&self.serialized)
            .map(|line| (key_of(&self.serialized, &line), &self.serialized[line.value]))
    }

    /// The serialized `Key: Value\r\n` block, without the terminating blank line.
    pub fn as_bytes(&self) -> &[u8] {
        &self.serialized
    }
}

impl Clone for HeaderStore {
    fn clone(&self) -> Self {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        Self {
            serialized: self.serialized.clone(),
            index: Mutex::new(index.clone()),
        }
    }
}

impl fmt::Debug for HeaderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderStore")
            .field("serialized", &String::from_utf8_lossy(&self.serialized))
            .finish()
    }
}

impl fmt::Display for HeaderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.serialized))
    }
}

fn key_hash(key: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for &byte in key {
        hasher.write_u8(byte.to_ascii_lowercase());
    }
    hasher.finish()
}

fn validate_name(key: &[u8]) -> Result<(), HeaderError> {
    if key.is_empty() {
        return Err(HeaderError::EmptyName);
    }
    if key
        .iter()
        .any(|&b| b == b':' || b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(HeaderError::InvalidName);
    }
    Ok(())
}

fn key_of<'a>(buf: &'a [u8], line: &Line) -> &'a [u8] {
    &buf[line.start..line.key_end]
}

fn line_at(buf: &[u8], start: usize) -> Option<Line> {
    let rest = buf.get(start..)?;
    let lf = start + memchr(b'\n', rest)?;
    let key_end = start + memchr(b':', &buf[start..lf])?;

    let value_limit = if lf > key_end + 1 && buf[lf - 1] == b'\r' {
        lf - 1
    } else {
        lf
    };

    let mut value_start = key_end + 1;
    while value_start < value_limit && matches!(buf[value_start], b' ' | b'\t') {
        value_start += 1;
    }
    let mut value_end = value_limit;
    while value_end > value_start && matches!(buf[value_end - 1], b' ' | b'\t') {
        value_end -= 1;
    }

    Some(Line {
        start,
        key_end,
        value: value_start..value_end,
        value_limit,
        end: lf + 1,
    })
}

fn lines(buf: &[u8]) -> impl Iterator<Item = Line> + '_ {
    let mut next = 0;
    std::iter::from_fn(move || {
        let line = line_at(buf, next)?;
        next = line.end;
        Some(line)
    })
}

// Index first, then a single scan that indexes every key it passes.
fn locate(buf: &[u8], index: &mut HashMap<u64, usize>, key: &[u8]) -> Option<Line> {
    let hash = key_hash(key);
    if let Some(&offset) = index.get(&hash) {
        if let Some(line) = line_at(buf, offset) {
            if key_of(buf, &line).eq_ignore_ascii_case(key) {
                return Some(line);
            }
        }
    }

    for line in lines(buf) {
        let line_key = key_of(buf, &line);
        index.entry(key_hash(line_key)).or_insert(line.start);
        if line_key.eq_ignore_ascii_case(key) {
            return Some(line);
        }
    }
    None
}
