//! Request targets: the path span, its query span and the route tokens.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use memchr::memchr;

use super::Query;

/// The target of a request, split into path and query.
///
/// Both parts are [`Bytes`] views over the buffer the request was parsed
/// from, so building a `Path` never copies. Tokens captured by the router
/// (`/users/:id` → `id`) are stored alongside.
///
/// Equality and hashing only consider the path bytes, not the query.
///
/// # Examples
///
/// ```
/// use spindle::http::Path;
///
/// let path = Path::from("/users//42/?tab=posts");
/// let segments: Vec<&[u8]> = path.segments().collect();
/// assert_eq!(segments, vec![&b"users"[..], &b"42"[..]]);
/// assert_eq!(path.query().get("tab").as_deref(), Some("posts"));
/// ```
#[derive(Clone, Default)]
pub struct Path {
    raw: Bytes,
    query: Query,
    tokens: HashMap<String, String>,
}

impl Path {
    /// Builds a path from a raw request target, splitting at the first `?`.
    ///
    /// A `?` that is the last byte of the target yields no query.
    pub fn from_target(target: Bytes) -> Self {
        match memchr(b'?', &target) {
            Some(pos) if pos + 1 < target.len() => {
                let query = target.slice(pos + 1..);
                Self::new(target.slice(..pos), Some(query))
            }
            Some(pos) => Self::new(target.slice(..pos), None),
            None => Self::new(target, None),
        }
    }

    /// Builds a path from already separated path and query spans.
    pub fn new(raw: Bytes, query: Option<Bytes>) -> Self {
        Self {
            raw,
            query: query.map(Query::new).unwrap_or_default(),
            tokens: HashMap::new(),
        }
    }

    /// The raw path bytes, without the query.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The path as UTF-8, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.raw).ok()
    }

    /// Non-empty `/`-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.raw.split(|&b| b == b'/').filter(|s| !s.is_empty())
    }

    /// The query part of the target (empty when there was none).
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns the runtime value captured for the route token `name`.
    pub fn token(&self, name: &str) -> Option<&str> {
        self.tokens.get(name).map(String::as_str)
    }

    /// All captured route tokens.
    pub fn tokens(&self) -> &HashMap<String, String> {
        &self.tokens
    }

    pub(crate) fn insert_token(&mut self, name: String, value: String) {
        self.tokens.insert(name, value);
    }
}

impl From<&str> for Path {
    fn from(target: &str) -> Self {
        Self::from_target(Bytes::copy_from_slice(target.as_bytes()))
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.raw))?;
        if !self.query.is_empty() {
            write!(f, "?{}", String::from_utf8_lossy(self.query.as_bytes()))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("raw", &String::from_utf8_lossy(&self.raw))
            .field("query", &self.query)
            .field("tokens", &self.tokens)
            .finish()
    }
}
