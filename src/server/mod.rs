//! Async TCP server using Tokio.
//!
//! Binds a listener with a fixed backlog, accepts connections and hands each
//! one to its own task on the runtime's worker pool. See [`connection`] for
//! what happens on a single connection.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, warn};

use crate::router::Router;

pub mod config;
pub mod connection;

pub use config::{HandlerErrorPolicy, ServerConfig};
pub use connection::{Connection, ConnectionError, serve_connection};

/// Length of the pending-connection queue passed to `listen`.
pub const BACKLOG: u32 = 4096;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("receive buffer size must be greater than zero")]
    InvalidBuffer,
}

/// The spindle HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use spindle::{Connection, HandlerError, Request, Response, Router, Server, ServerConfig, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |_req: Request, conn: Connection| async move {
///         conn.send_response(Response::new(StatusCode::Ok).body("Hello!")).await?;
///         Ok::<_, HandlerError>(())
///     });
///
///     let server = Server::bind(ServerConfig::default().with_port(8080)).await?;
///     server.run(router).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Binds a listener to `config.hostname:config.port`.
    ///
    /// Every address the hostname resolves to is tried in order until one
    /// binds.
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidBuffer`] for a zero receive buffer and
    /// [`ServerError::Bind`] if no address can be bound (port in use,
    /// insufficient permissions, unresolvable host).
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.address();
        let bind_error = |source: io::Error| ServerError::Bind {
            addr: addr.clone(),
            source,
        };

        let mut last_error = None;
        for candidate in tokio::net::lookup_host(addr.as_str()).await.map_err(bind_error)? {
            match listen(candidate) {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    return Ok(Self {
                        listener,
                        local_addr,
                        config: Arc::new(config),
                    });
                }
                Err(e) => {
                    debug!(address = %candidate, error = %e, "bind attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(bind_error(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")
        })))
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts connections until the process ends.
    pub async fn run(self, router: impl Into<Arc<Router>>) -> Result<(), ServerError> {
        self.run_until(router, std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Connections still open at that point keep running until their next
    /// request, which they can no longer route once the router is dropped.
    pub async fn run_until(
        self,
        router: impl Into<Arc<Router>>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServerError> {
        let router = router.into();
        info!(address = %self.local_addr, routes = router.len(), "spindle listening");
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested; no longer accepting");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer_addr, error = %e, "could not disable Nagle");
            }

            let router = Arc::downgrade(&router);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                if let Err(e) = connection::serve(stream, Some(peer_addr), router, &config).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(BACKLOG)
}
