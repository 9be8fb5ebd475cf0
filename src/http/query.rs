//! URL query strings and `application/x-www-form-urlencoded` bodies.

use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use bytes::Bytes;
use memchr::{memchr, memchr_iter};
use percent_encoding::percent_decode;

/// A lazily indexed query string.
///
/// The raw bytes are kept untouched. The first lookup splits them on `&` and
/// records where each segment's first `=` sits, so later lookups on the same
/// query never rescan. Keys and values are percent-decoded (and `+` turned
/// into a space) only when they are read.
///
/// # Examples
///
/// ```
/// use spindle::http::Query;
///
/// let query = Query::from_static(b"name=J%C3%BCrgen&flag&city=New+York");
/// assert_eq!(query.get("name").as_deref(), Some("Jürgen"));
/// assert_eq!(query.get("flag").as_deref(), Some(""));
/// assert_eq!(query.get("city").as_deref(), Some("New York"));
/// assert!(query.get("missing").is_none());
/// ```
#[derive(Clone, Default)]
pub struct Query {
    raw: Bytes,
    segments: OnceLock<Vec<Segment>>,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: usize,
    // Absolute offset of the first `=`, if any.
    eq: Option<usize>,
    end: usize,
}

impl Query {
    /// Wraps a raw query (without the leading `?`).
    pub fn new(raw: Bytes) -> Self {
        Self {
            raw,
            segments: OnceLock::new(),
        }
    }

    /// Wraps a static byte string; mostly useful in tests and docs.
    pub fn from_static(raw: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(raw))
    }

    /// The undecoded query bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns the decoded value of the first pair whose decoded key is `key`.
    ///
    /// A key present without `=` yields an empty value.
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.find(key).map(|segment| decode(self.value_of(segment)))
    }

    /// Returns the still-encoded value bytes for `key`.
    pub fn get_raw(&self, key: &str) -> Option<&[u8]> {
        self.find(key).map(|segment| self.value_of(segment))
    }

    /// Returns `true` if a pair with this key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Iterates over all decoded `(key, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (Cow<'_, str>, Cow<'_, str>)> {
        self.segments()
            .iter()
            .map(|segment| (decode(self.key_of(segment)), decode(self.value_of(segment))))
    }

    fn segments(&self) -> &[Segment] {
        self.segments.get_or_init(|| split_segments(&self.raw))
    }

    fn find(&self, key: &str) -> Option<&Segment> {
        self.segments().iter().find(|segment| {
            let raw_key = self.key_of(segment);
            if needs_decoding(raw_key) {
                decode(raw_key) == key
            } else {
                raw_key == key.as_bytes()
            }
        })
    }

    fn key_of(&self, segment: &Segment) -> &[u8] {
        &self.raw[segment.start..segment.eq.unwrap_or(segment.end)]
    }

    fn value_of(&self, segment: &Segment) -> &[u8] {
        match segment.eq {
            Some(eq) => &self.raw[eq + 1..segment.end],
            None => &[],
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Query")
            .field(&String::from_utf8_lossy(&self.raw))
            .finish()
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Query {}

fn split_segments(raw: &[u8]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut start = 0;
    let ends = memchr_iter(b'&', raw).chain(std::iter::once(raw.len()));

    for end in ends {
        if end > start {
            let eq = memchr(b'=', &raw[start..end]).map(|i| start + i);
            segments.push(Segment { start, eq, end });
        }
        start = end + 1;
    }
    segments
}

fn needs_decoding(raw: &[u8]) -> bool {
    raw.iter().any(|&b| b == b'%' || b == b'+')
}

fn decode(raw: &[u8]) -> Cow<'_, str> {
    if raw.contains(&b'+') {
        let spaced: Vec<u8> = raw
            .iter()
            .map(|&b| if b == b'+' { b' ' } else { b })
            .collect();
        return Cow::Owned(percent_decode(&spaced).decode_utf8_lossy().into_owned());
    }
    percent_decode(raw).decode_utf8_lossy()
}
