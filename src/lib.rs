//! # spindle
//!
//! A small, embeddable HTTP/1.x engine: an incremental request parser, a
//! trie router with `:token` path segments, keep-alive and pipelining, and
//! WebSocket upgrades with RFC 6455 framing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spindle::{Connection, HandlerError, Request, Response, Router, Server, ServerConfig, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/hello/:name", |req: Request, conn: Connection| async move {
//!         let name = req.token("name").unwrap_or("world").to_owned();
//!         conn.send_response(Response::new(StatusCode::Ok).body(format!("Hello, {name}!")))
//!             .await?;
//!         Ok::<_, HandlerError>(())
//!     });
//!
//!     let server = Server::bind(ServerConfig::default().with_port(8080)).await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.run(router).await?;
//!     Ok(())
//! }
//! ```
//!
//! Handlers answer through the [`Connection`] they receive. A handler may
//! send nothing, send several times, close the connection, or hand it over
//! to [`websocket::upgrade`].

pub mod error;
pub mod http;
pub mod router;
pub mod server;
pub mod websocket;

pub use error::{Error, Result};
pub use http::{ExtractError, HeaderStore, Method, Request, Response, StatusCode, Version};
pub use router::{Handler, HandlerError, HandlerResult, IntoHandler, Router};
pub use server::{
    BACKLOG, Connection, ConnectionError, HandlerErrorPolicy, Server, ServerConfig, ServerError,
    serve_connection,
};
pub use websocket::{WebSocket, WebSocketHandlers};
