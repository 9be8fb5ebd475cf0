//! Trie nodes for the router.

use std::collections::HashMap;

use super::Handler;
use crate::http::Method;

/// Default token prefix: segments starting with it (and longer than it)
/// capture a value.
pub const TOKEN_BYTE: u8 = b':';

/// One path segment in the routing trie.
///
/// A node owns the handlers registered for the exact path that ends at it,
/// an optional fallback that covers its whole subtree, and its children in
/// registration order.
#[derive(Default)]
pub(crate) struct TrieNode {
    label: String,
    handlers: HashMap<Method, Handler>,
    fallback: Option<Handler>,
    children: Vec<TrieNode>,
}

impl TrieNode {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            ..Self::default()
        }
    }

    /// The token name when the label is `token` followed by a name, `None`
    /// for literals.
    pub(crate) fn token_name(&self, token: u8) -> Option<&str> {
        match self.label.as_bytes() {
            [first, _, ..] if *first == token => self.label.get(1..),
            _ => None,
        }
    }

    /// Returns the child labelled exactly `segment`, creating it if needed.
    pub(crate) fn child_or_insert(&mut self, segment: &str) -> &mut TrieNode {
        let pos = match self.children.iter().position(|c| c.label == segment) {
            Some(pos) => pos,
            None => {
                self.children.push(TrieNode::new(segment));
                self.children.len() - 1
            }
        };
        &mut self.children[pos]
    }

    pub(crate) fn literal_child(&self, segment: &[u8]) -> Option<&TrieNode> {
        self.children
            .iter()
            .find(|c| c.label.as_bytes() == segment)
    }

    pub(crate) fn token_child(&self, token: u8) -> Option<&TrieNode> {
        self.children.iter().find(|c| c.token_name(token).is_some())
    }

    /// Stores `handler` for `method`, returning the handler it replaced.
    pub(crate) fn set_handler(&mut self, method: Method, handler: Handler) -> Option<Handler> {
        self.handlers.insert(method, handler)
    }

    pub(crate) fn set_fallback(&mut self, handler: Handler) -> Option<Handler> {
        self.fallback.replace(handler)
    }

    pub(crate) fn handler(&self, method: &Method) -> Option<&Handler> {
        self.handlers.get(method)
    }

    pub(crate) fn fallback(&self) -> Option<&Handler> {
        self.fallback.as_ref()
    }

    /// Number of handlers (method routes and fallbacks) in this subtree.
    pub(crate) fn route_count(&self) -> usize {
        self.handlers.len()
            + usize::from(self.fallback.is_some())
            + self.children.iter().map(TrieNode::route_count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_labels() {
        assert_eq!(TrieNode::new(":id").token_name(TOKEN_BYTE), Some("id"));
        assert_eq!(TrieNode::new("users").token_name(TOKEN_BYTE), None);
        // a lone token byte is a literal
        assert_eq!(TrieNode::new(":").token_name(TOKEN_BYTE), None);

        assert_eq!(TrieNode::new("{id").token_name(b'{'), Some("id"));
        assert_eq!(TrieNode::new(":id").token_name(b'{'), None);
        // non-ASCII prefixes never split a character
        assert_eq!(TrieNode::new("éa").token_name(0xC3), None);
    }

    #[test]
    fn children_are_reused() {
        let mut root = TrieNode::default();
        root.child_or_insert("users").child_or_insert(":id");
        root.child_or_insert("users").child_or_insert("me");
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].children.len(), 2);
        assert!(root.literal_child(b"users").is_some());
        assert!(root.literal_child(b"posts").is_none());
        assert_eq!(
            root.children[0]
                .token_child(TOKEN_BYTE)
                .and_then(|c| c.token_name(TOKEN_BYTE)),
            Some("id")
        );
    }
}
