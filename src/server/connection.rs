//! Per-connection state and the read → parse → route loop.
//!
//! Every accepted stream is served by one task running [`ConnectionTask`].
//! The task owns the read half, the fixed receive buffer and the parser, so at
//! most one read is ever in flight per connection and pipelined requests are
//! dispatched strictly in arrival order. Handlers answer through a cloneable
//! [`Connection`] handle that shares the write half.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::config::{HandlerErrorPolicy, ServerConfig};
use crate::http::{ParseOutcome, RequestParser, Response};
use crate::router::Router;
use crate::websocket::{Session, WebSocketHandlers};

/// Errors produced while serving a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to send on connection: {0}")]
    SendFailure(#[source] io::Error),

    #[error("failed to read from connection: {0}")]
    CannotRead(#[source] io::Error),

    #[error("empty buffer")]
    InvalidBuffer,

    #[error("connection is closed")]
    Closed,
}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Shared {
    id: u64,
    peer: Option<SocketAddr>,
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    closed: AtomicBool,
    // A sent response announced `Connection: close`.
    closing: AtomicBool,
    close_signal: Notify,
    // Set by a handler that accepted a WebSocket upgrade.
    upgrade: Mutex<Option<WebSocketHandlers>>,
}

/// Handle to one client connection.
///
/// Cloning is cheap; all clones refer to the same connection. Sends are
/// serialized, so concurrent writers never interleave their bytes.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub(crate) fn new(writer: BoxWriter, peer: Option<SocketAddr>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                peer,
                writer: tokio::sync::Mutex::new(Some(writer)),
                closed: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                close_signal: Notify::new(),
                upgrade: Mutex::new(None),
            }),
        }
    }

    /// Process-unique connection id, used in log fields.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Remote address, when the transport has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Writes `bytes` completely.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::InvalidBuffer`] for an empty slice,
    /// [`ConnectionError::Closed`] after [`close`](Self::close), and
    /// [`ConnectionError::SendFailure`] when the transport fails, which also
    /// closes the connection.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if bytes.is_empty() {
            return Err(ConnectionError::InvalidBuffer);
        }
        self.send_chunks(std::slice::from_ref(&bytes)).await
    }

    /// Serializes `response` and sends it.
    ///
    /// A response that announces `Connection: close` ends the connection once
    /// the current handler returns.
    pub async fn send_response(&self, response: Response) -> Result<(), ConnectionError> {
        let closes = response.closes_connection();
        self.send(&response.into_bytes()).await?;
        if closes {
            self.shared.closing.store(true, Ordering::Release);
        }
        Ok(())
    }

    pub(crate) fn closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Writes several buffers back to back while holding the write lock.
    pub(crate) async fn send_chunks<B: AsRef<[u8]>>(
        &self,
        chunks: &[B],
    ) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let mut guard = self.shared.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        let mut result = Ok(());
        for chunk in chunks {
            result = writer.write_all(chunk.as_ref()).await;
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = writer.flush().await;
        }
        drop(guard);

        result.map_err(|e| {
            warn!(conn = self.id(), error = %e, "send failed; closing connection");
            self.close();
            ConnectionError::SendFailure(e)
        })
    }

    /// Closes the connection. Calling it again has no effect.
    ///
    /// The read loop is woken and stops, pending WebSocket callbacks are
    /// dropped and the write half is shut down by the connection task.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upgrade_slot().take();
        self.shared.close_signal.notify_one();
        debug!(conn = self.id(), "connection closed");
    }

    pub(crate) fn set_upgrade(&self, handlers: WebSocketHandlers) {
        if !self.is_closed() {
            *self.upgrade_slot() = Some(handlers);
        }
    }

    pub(crate) fn take_upgrade(&self) -> Option<WebSocketHandlers> {
        self.upgrade_slot().take()
    }

    fn upgrade_slot(&self) -> std::sync::MutexGuard<'_, Option<WebSocketHandlers>> {
        self.shared
            .upgrade
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn shutdown_writer(&self) {
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(conn = self.id(), error = %e, "writer shutdown failed");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Serves HTTP (and WebSocket, after an upgrade) on any byte stream.
///
/// This is how TLS or in-memory transports plug in: wrap the stream so it
/// implements `AsyncRead + AsyncWrite` and hand it over. The future resolves
/// when the connection closes.
///
/// # Errors
///
/// [`ConnectionError::InvalidBuffer`] for a zero-sized receive buffer and
/// [`ConnectionError::CannotRead`] when the transport fails on read.
pub async fn serve_connection<IO>(
    io: IO,
    router: &Arc<Router>,
    config: &ServerConfig,
) -> Result<(), ConnectionError>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    serve(io, None, Arc::downgrade(router), config).await
}

pub(crate) async fn serve<IO>(
    io: IO,
    peer: Option<SocketAddr>,
    router: Weak<Router>,
    config: &ServerConfig,
) -> Result<(), ConnectionError>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if config.receive_buffer_size == 0 {
        return Err(ConnectionError::InvalidBuffer);
    }

    let (reader, writer) = tokio::io::split(io);
    let conn = Connection::new(Box::new(writer), peer);
    let task = ConnectionTask {
        conn: conn.clone(),
        reader,
        buf: vec![0; config.receive_buffer_size].into_boxed_slice(),
        parser: RequestParser::with_limits(config.parser_limits()),
        router,
        policy: config.handler_error_policy,
        max_websocket_message: config.max_websocket_message,
    };

    let result = task.run().await;
    conn.close();
    conn.shutdown_writer().await;
    result
}

enum HttpExit {
    Closed,
    Upgrade(WebSocketHandlers),
}

struct ConnectionTask<R> {
    conn: Connection,
    reader: R,
    buf: Box<[u8]>,
    parser: RequestParser,
    router: Weak<Router>,
    policy: HandlerErrorPolicy,
    max_websocket_message: usize,
}

impl<R: AsyncRead + Unpin> ConnectionTask<R> {
    async fn run(mut self) -> Result<(), ConnectionError> {
        let handlers = match self.serve_http().await? {
            HttpExit::Closed => return Ok(()),
            HttpExit::Upgrade(handlers) => handlers,
        };

        debug!(conn = self.conn.id(), "switching to websocket");
        let leftovers: BytesMut = self.parser.take_leftovers();
        let mut session = Session::new(
            self.conn.clone(),
            handlers,
            leftovers,
            self.max_websocket_message,
        );

        let mut result = Ok(());
        if session.receive(&[]).await {
            loop {
                match self.read_chunk().await {
                    Ok(Some(n)) => {
                        if !session.receive(&self.buf[..n]).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
        }

        self.conn.close();
        session.finish().await;
        result
    }

    async fn serve_http(&mut self) -> Result<HttpExit, ConnectionError> {
        loop {
            let Some(n) = self.read_chunk().await? else {
                return Ok(HttpExit::Closed);
            };

            let mut outcome = self.parser.feed(&self.buf[..n]);
            loop {
                let request = match outcome {
                    ParseOutcome::Incomplete => break,
                    ParseOutcome::Malformed(e) => {
                        warn!(conn = self.conn.id(), error = %e, "malformed request; closing connection");
                        return Ok(HttpExit::Closed);
                    }
                    ParseOutcome::Complete(request) => request,
                };

                let keep_alive = request.is_keep_alive();
                let Some(router) = self.router.upgrade() else {
                    debug!(conn = self.conn.id(), "server is gone; closing connection");
                    return Ok(HttpExit::Closed);
                };

                if let Err(e) = router.dispatch(request, self.conn.clone()).await {
                    match self.policy {
                        HandlerErrorPolicy::Close => {
                            warn!(conn = self.conn.id(), error = %e, "handler failed; closing connection");
                            return Ok(HttpExit::Closed);
                        }
                        HandlerErrorPolicy::Ignore => {
                            warn!(conn = self.conn.id(), error = %e, "handler failed");
                        }
                    }
                }

                if self.conn.is_closed() {
                    return Ok(HttpExit::Closed);
                }
                if let Some(handlers) = self.conn.take_upgrade() {
                    return Ok(HttpExit::Upgrade(handlers));
                }
                if !keep_alive || self.conn.closing() {
                    debug!(conn = self.conn.id(), "Connection: close; shutting down");
                    return Ok(HttpExit::Closed);
                }

                outcome = self.parser.feed(&[]);
            }
        }
    }

    // `None` once the peer hung up or the connection was closed locally.
    async fn read_chunk(&mut self) -> Result<Option<usize>, ConnectionError> {
        if self.conn.is_closed() {
            return Ok(None);
        }
        let shared = Arc::clone(&self.conn.shared);

        tokio::select! {
            _ = shared.close_signal.notified() => Ok(None),
            read = self.reader.read(&mut self.buf) => match read {
                Ok(0) => {
                    debug!(conn = self.conn.id(), "connection closed by peer");
                    Ok(None)
                }
                Ok(n) => Ok(Some(n)),
                Err(e) => {
                    warn!(conn = self.conn.id(), error = %e, "read failed; closing connection");
                    Err(ConnectionError::CannotRead(e))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{recording_connection, sent_bytes};
    use crate::{HandlerError, Request, StatusCode};

    #[tokio::test]
    async fn send_rejects_empty_buffer() {
        let (conn, _sink) = recording_connection();
        assert!(matches!(
            conn.send(b"").await,
            Err(ConnectionError::InvalidBuffer)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (conn, sink) = recording_connection();
        conn.send(b"hello").await.unwrap();
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(matches!(conn.send(b"more").await, Err(ConnectionError::Closed)));
        assert_eq!(sent_bytes(&sink), b"hello");
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let (a, _) = recording_connection();
        let (b, _) = recording_connection();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[tokio::test]
    async fn close_clears_pending_upgrade() {
        let (conn, _) = recording_connection();
        conn.set_upgrade(WebSocketHandlers::new());
        conn.close();
        assert!(conn.take_upgrade().is_none());
    }

    #[tokio::test]
    async fn serves_pipelined_requests_in_order() {
        let mut router = Router::new();
        router.get("/:name", |req: Request, conn: Connection| async move {
            let name = req.token("name").unwrap_or_default().to_owned();
            conn.send_response(Response::new(StatusCode::Ok).body(name))
                .await?;
            Ok::<_, HandlerError>(())
        });
        let router = Arc::new(router);

        let (client, server) = tokio::io::duplex(1024);
        let config = ServerConfig::default();
        let served = tokio::spawn(async move { serve_connection(server, &router, &config).await });

        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\nGET /three HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        let one = text.find("\r\n\r\none").unwrap();
        let two = text.find("\r\n\r\ntwo").unwrap();
        let three = text.find("\r\n\r\nthree").unwrap();
        assert!(one < two && two < three);
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn malformed_request_closes_silently() {
        let router = Arc::new(Router::new());
        let (client, server) = tokio::io::duplex(1024);
        let config = ServerConfig::default();
        let served = tokio::spawn(async move { serve_connection(server, &router, &config).await });

        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"GET / HTTP/1.1\nHost: x\r\n\r\n").await.unwrap();

        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn handler_error_policy() {
        let mut router = Router::new();
        router.get("/fail", |_req: Request, _conn: Connection| async move {
            Err::<(), HandlerError>("boom".into())
        });
        let router = Arc::new(router);

        // Close: the second request is never answered.
        let (client, server) = tokio::io::duplex(1024);
        let config = ServerConfig::default();
        let closing = Arc::clone(&router);
        tokio::spawn(async move { serve_connection(server, &closing, &config).await });
        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"GET /fail HTTP/1.1\r\n\r\nGET /missing HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());

        // Ignore: the connection keeps going and the 404 arrives.
        let (client, server) = tokio::io::duplex(1024);
        let config = ServerConfig::default().with_handler_error_policy(HandlerErrorPolicy::Ignore);
        tokio::spawn(async move { serve_connection(server, &router, &config).await });
        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"GET /fail HTTP/1.1\r\n\r\nGET /missing HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn response_connection_close_ends_connection() {
        let mut router = Router::new();
        router.get("/last", |_req: Request, conn: Connection| async move {
            conn.send_response(Response::new(StatusCode::Ok).body("last").keep_alive(false))
                .await?;
            Ok::<_, HandlerError>(())
        });
        let router = Arc::new(router);

        let (client, server) = tokio::io::duplex(1024);
        let config = ServerConfig::default();
        let served = tokio::spawn(async move { serve_connection(server, &router, &config).await });

        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"GET /last HTTP/1.1\r\n\r\nGET /missing HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nlast"));
        assert!(!text.contains("404"));
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dropped_router_closes_connection() {
        let router = Arc::new(Router::new());
        let weak = Arc::downgrade(&router);
        drop(router);

        let (client, server) = tokio::io::duplex(1024);
        let config = ServerConfig::default();
        let served = tokio::spawn(async move { serve(server, None, weak, &config).await });

        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn zero_buffer_is_rejected() {
        let router = Arc::new(Router::new());
        let (_client, server) = tokio::io::duplex(64);
        let config = ServerConfig::default().with_receive_buffer_size(0);
        assert!(matches!(
            serve_connection(server, &router, &config).await,
            Err(ConnectionError::InvalidBuffer)
        ));
    }
}
