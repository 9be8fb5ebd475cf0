//! Request routing: a trie from path segments and methods to handlers.
//!
//! Routes are registered as `/`-separated patterns. Each non-empty segment is
//! either a literal or a token (`:name`) that captures the runtime segment:
//!
//! | Pattern              | Example match   | Captured tokens  |
//! |----------------------|-----------------|------------------|
//! | `/users`             | `/users`        | *(none)*         |
//! | `/users/:id`         | `/users/42`     | `id → "42"`      |
//! | `/users/:id/posts`   | `/users/7/posts`| `id → "7"`       |
//!
//! Empty segments are ignored on both sides, so `/users/` and `//users`
//! route like `/users`. At every level an exact literal beats a token.
//!
//! A fallback registered for a path covers the whole subtree below it. When a
//! request cannot be matched, the deepest fallback on the walked path runs
//! (the root's included); without one, the router's default handler runs,
//! which replies `404 Not Found`.

use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::http::{Method, Request, Response, StatusCode};
use crate::server::Connection;

mod node;

use node::TrieNode;
pub use node::TOKEN_BYTE;

/// Error type handlers may return. The connection applies its
/// [`HandlerErrorPolicy`](crate::server::HandlerErrorPolicy) to it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What every handler future resolves to.
pub type HandlerResult = Result<(), HandlerError>;

/// Type-erased, heap-allocated async handler.
///
/// A handler receives the [`Request`] by value and a [`Connection`] handle to
/// answer on; the engine never responds on its behalf. Handlers are stored
/// behind `Arc<dyn Fn(…)>` so they can be shared across connection tasks
/// without copying the underlying closure.
pub type Handler = Arc<
    dyn Fn(Request, Connection) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>>
        + Send
        + Sync
        + 'static,
>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request, Connection) -> impl Future<Output = HandlerResult> + Send`
/// that is also `Send + Sync + 'static` implements this trait through the
/// blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Calls the handler, boxing the returned future.
    fn call(
        &self,
        request: Request,
        conn: Connection,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request, Connection) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(
        &self,
        request: Request,
        conn: Connection,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> {
        Box::pin((self)(request, conn))
    }
}

fn into_handler(handler: impl IntoHandler) -> Handler {
    Arc::new(move |request, conn| handler.call(request, conn))
}

/// Trie-based HTTP router.
///
/// Registration happens before the router is handed to a
/// [`Server`](crate::Server); after that it is shared read-only.
///
/// # Examples
///
/// ```rust,no_run
/// use spindle::{Connection, HandlerError, Request, Response, Router, StatusCode};
///
/// let mut router = Router::new();
///
/// router.get("/users/:id", |req: Request, conn: Connection| async move {
///     let id = req.token("id").unwrap_or("unknown").to_owned();
///     conn.send_response(Response::new(StatusCode::Ok).body(id)).await?;
///     Ok::<_, HandlerError>(())
/// });
/// ```
pub struct Router {
    root: TrieNode,
    default: Handler,
    token_byte: u8,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates an empty router whose default handler replies `404 Not Found`.
    pub fn new() -> Self {
        Self {
            root: TrieNode::default(),
            default: into_handler(not_found),
            token_byte: TOKEN_BYTE,
        }
    }

    /// Uses `byte` instead of `:` to mark token segments.
    ///
    /// The byte is read at match time, so it applies to routes registered
    /// before and after this call.
    ///
    /// ```
    /// use spindle::Router;
    ///
    /// let router = Router::new().with_token_byte(b'$');
    /// assert_eq!(router.token_byte(), b'$');
    /// ```
    #[must_use]
    pub fn with_token_byte(mut self, byte: u8) -> Self {
        self.token_byte = byte;
        self
    }

    pub fn token_byte(&self) -> u8 {
        self.token_byte
    }

    /// Registers `handler` for `method` requests on `path`.
    ///
    /// Registering the same method and path again replaces the earlier handler.
    pub fn register(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let node = self.descend_or_create(path);
        if node.set_handler(method.clone(), into_handler(handler)).is_some() {
            debug!(%method, path, "replaced route handler");
        } else {
            debug!(%method, path, "registered route");
        }
    }

    /// Registers a fallback for `path` and everything below it.
    pub fn register_fallback(&mut self, path: &str, handler: impl IntoHandler) {
        let node = self.descend_or_create(path);
        if node.set_fallback(into_handler(handler)).is_some() {
            debug!(path, "replaced fallback handler");
        } else {
            debug!(path, "registered fallback");
        }
    }

    /// Shorthand for [`register_fallback`](Self::register_fallback).
    pub fn fallback(&mut self, path: &str, handler: impl IntoHandler) {
        self.register_fallback(path, handler);
    }

    /// Replaces the handler that runs when nothing else matches.
    pub fn set_default(&mut self, handler: impl IntoHandler) {
        self.default = into_handler(handler);
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.register(Method::Get, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.register(Method::Post, path, handler);
    }

    pub fn put(&mut self, path: &str, handler: impl IntoHandler) {
        self.register(Method::Put, path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.register(Method::Delete, path, handler);
    }

    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) {
        self.register(Method::Patch, path, handler);
    }

    pub fn options(&mut self, path: &str, handler: impl IntoHandler) {
        self.register(Method::Options, path, handler);
    }

    /// Number of registered method routes and fallbacks.
    pub fn len(&self) -> usize {
        self.root.route_count()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the handler for `request`, recording captured tokens into
    /// its path.
    ///
    /// Resolution never fails: an unmatched request gets the deepest
    /// fallback on its path, or the default handler.
    pub fn route(&self, request: &mut Request) -> Handler {
        let mut node = &self.root;
        let mut fallback = self.root.fallback();
        let mut tokens = Vec::new();
        let mut matched = true;

        for segment in request.path().segments() {
            let next = node.literal_child(segment).or_else(|| {
                let child = node.token_child(self.token_byte)?;
                let name = child.token_name(self.token_byte)?;
                tokens.push((name.to_owned(), String::from_utf8_lossy(segment).into_owned()));
                Some(child)
            });

            match next {
                Some(child) => {
                    node = child;
                    if let Some(handler) = child.fallback() {
                        fallback = Some(handler);
                    }
                }
                None => {
                    matched = false;
                    break;
                }
            }
        }

        let path = request.path_mut();
        for (name, value) in tokens {
            path.insert_token(name, value);
        }

        let handler = if matched {
            node.handler(request.method())
        } else {
            None
        };
        Arc::clone(handler.or(fallback).unwrap_or(&self.default))
    }

    /// Routes `request` and runs the resolved handler to completion.
    pub async fn dispatch(&self, mut request: Request, conn: Connection) -> HandlerResult {
        let handler = self.route(&mut request);
        debug!(
            conn = conn.id(),
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );
        handler(request, conn).await
    }

    fn descend_or_create(&mut self, path: &str) -> &mut TrieNode {
        path.split('/')
            .filter(|s| !s.is_empty())
            .fold(&mut self.root, |node, segment| node.child_or_insert(segment))
    }
}

async fn not_found(_request: Request, conn: Connection) -> HandlerResult {
    conn.send_response(Response::new(StatusCode::NotFound).body("Not Found"))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{recording_connection, sent_bytes};

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap()
    }

    // Handler that answers with its own marker in the body.
    fn marker(name: &'static str) -> impl IntoHandler {
        move |_req: Request, conn: Connection| async move {
            conn.send_response(Response::new(StatusCode::Ok).body(name))
                .await?;
            Ok::<_, HandlerError>(())
        }
    }

    async fn run(router: &Router, method: &str, path: &str) -> String {
        let (conn, sink) = recording_connection();
        router
            .dispatch(make_request(method, path), conn)
            .await
            .unwrap();
        let bytes = sent_bytes(&sink);
        let text = String::from_utf8(bytes).unwrap();
        match text.split_once("\r\n\r\n") {
            Some((_, body)) => body.to_owned(),
            None => text,
        }
    }

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn len_counts_routes_and_fallbacks() {
        let mut router = Router::new();
        router.get("/a", marker("a"));
        router.post("/a", marker("a"));
        router.get("/b/c", marker("c"));
        router.fallback("/b", marker("fb"));
        assert_eq!(router.len(), 4);

        router.get("/a", marker("again"));
        assert_eq!(router.len(), 4);
    }

    #[test]
    fn route_lookup_is_idempotent() {
        let mut router = Router::new();
        router.get("/users/:id", marker("user"));

        let first = router.route(&mut make_request("GET", "/users/1"));
        let second = router.route(&mut make_request("GET", "/users/1"));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &router.default));
    }

    #[tokio::test]
    async fn resolution_ignores_registration_order() {
        let routes = [
            ("/a/b", "ab"),
            ("/a/:x", "ax"),
            ("/c", "c"),
            ("/a/b/d", "abd"),
        ];
        let mut forward = Router::new();
        for (path, name) in routes {
            forward.get(path, marker(name));
        }
        let mut reverse = Router::new();
        for &(path, name) in routes.iter().rev() {
            reverse.get(path, marker(name));
        }

        for (path, expected) in [
            ("/a/b", "ab"),
            ("/a/z", "ax"),
            ("/c", "c"),
            ("/a/b/d", "abd"),
            ("/a/b/e", "Not Found"),
        ] {
            assert_eq!(run(&forward, "GET", path).await, expected, "{path}");
            assert_eq!(run(&reverse, "GET", path).await, expected, "{path}");
        }
    }

    #[test]
    fn custom_token_byte() {
        let mut router = Router::new().with_token_byte(b'$');
        router.get("/users/$id", marker("dollar"));
        router.get("/posts/:id", marker("colon"));

        let mut req = make_request("GET", "/users/7");
        let handler = router.route(&mut req);
        assert!(!Arc::ptr_eq(&handler, &router.default));
        assert_eq!(req.token("id"), Some("7"));

        // `:` is an ordinary literal now.
        let handler = router.route(&mut make_request("GET", "/posts/7"));
        assert!(Arc::ptr_eq(&handler, &router.default));
        let handler = router.route(&mut make_request("GET", "/posts/:id"));
        assert!(!Arc::ptr_eq(&handler, &router.default));
    }

    #[test]
    fn tokens_are_recorded() {
        let mut router = Router::new();
        router.get("/users/:id/posts/:post", marker("post"));

        let mut req = make_request("GET", "/users/42/posts/7");
        router.route(&mut req);
        assert_eq!(req.token("id"), Some("42"));
        assert_eq!(req.token("post"), Some("7"));
    }

    #[test]
    fn unmatched_goes_to_default() {
        let mut router = Router::new();
        router.get("/hello", marker("hello"));
        let handler = router.route(&mut make_request("GET", "/world"));
        assert!(Arc::ptr_eq(&handler, &router.default));
    }

    #[tokio::test]
    async fn literal_beats_token() {
        let mut router = Router::new();
        router.get("/users/:id", marker("token"));
        router.get("/users/me", marker("literal"));

        assert_eq!(run(&router, "GET", "/users/me").await, "literal");
        assert_eq!(run(&router, "GET", "/users/42").await, "token");
    }

    #[tokio::test]
    async fn empty_segments_are_ignored() {
        let mut router = Router::new();
        router.get("/a/b/", marker("ab"));
        assert_eq!(run(&router, "GET", "//a///b").await, "ab");
    }

    #[tokio::test]
    async fn method_mismatch_uses_fallback_or_default() {
        let mut router = Router::new();
        router.get("/hello", marker("get"));
        assert_eq!(run(&router, "POST", "/hello").await, "Not Found");

        router.fallback("/", marker("root"));
        assert_eq!(run(&router, "POST", "/hello").await, "root");
    }

    #[tokio::test]
    async fn deepest_fallback_wins() {
        let mut router = Router::new();
        router.fallback("/", marker("root"));
        router.fallback("/api", marker("api"));
        router.get("/api/v1/users", marker("users"));

        assert_eq!(run(&router, "GET", "/api/v1/users").await, "users");
        assert_eq!(run(&router, "GET", "/api/v1/missing").await, "api");
        assert_eq!(run(&router, "GET", "/api/v1").await, "api");
        assert_eq!(run(&router, "GET", "/other").await, "root");
    }

    #[tokio::test]
    async fn reregistering_replaces_handler() {
        let mut router = Router::new();
        router.get("/path", marker("first"));
        router.get("/path", marker("second"));
        assert_eq!(run(&router, "GET", "/path").await, "second");
    }

    #[tokio::test]
    async fn custom_default() {
        let mut router = Router::new();
        router.set_default(marker("nothing here"));
        assert_eq!(run(&router, "GET", "/x").await, "nothing here");
    }

    #[tokio::test]
    async fn default_replies_404() {
        let router = Router::new();
        let (conn, sink) = recording_connection();
        router
            .dispatch(make_request("GET", "/"), conn.clone())
            .await
            .unwrap();
        let text = String::from_utf8(sent_bytes(&sink)).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn method_variants_registered() {
        let mut router = Router::new();
        router.put("/r", marker("put"));
        router.delete("/r", marker("delete"));
        router.patch("/r", marker("patch"));
        router.options("/r", marker("options"));
        router.register(Method::Other("PROPFIND".into()), "/r", marker("propfind"));

        assert_eq!(router.len(), 5);
        for (method, expected) in [
            ("PUT", "put"),
            ("DELETE", "delete"),
            ("PATCH", "patch"),
            ("OPTIONS", "options"),
            ("PROPFIND", "propfind"),
        ] {
            assert_eq!(run(&router, method, "/r").await, expected);
        }
    }
}
