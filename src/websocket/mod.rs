//! WebSocket (RFC 6455) support.
//!
//! A handler upgrades a request with [`upgrade`], passing the callbacks that
//! should receive messages. Once the handler returns, the connection stops
//! speaking HTTP and its task feeds every further byte, starting with any
//! that were pipelined behind the upgrade request, into a [`Session`].

use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::http::Request;
use crate::router::HandlerResult;
use crate::server::{Connection, ConnectionError};

pub mod frame;
pub mod handshake;

pub use frame::{Frame, FrameError, FrameHeader, MAX_CHUNK, Opcode};
pub use handshake::{Handshake, UpgradeError, accept_key};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type MessageCallback<T> = Arc<dyn Fn(WebSocket, T) -> BoxFuture<HandlerResult> + Send + Sync>;
type CloseCallback = Arc<dyn Fn(WebSocket) -> BoxFuture<()> + Send + Sync>;

/// Callbacks for an upgraded connection.
///
/// Missing callbacks drop the corresponding messages. A callback returning an
/// error closes the connection.
#[derive(Clone, Default)]
pub struct WebSocketHandlers {
    on_text: Option<MessageCallback<String>>,
    on_binary: Option<MessageCallback<Bytes>>,
    on_close: Option<CloseCallback>,
}

impl WebSocketHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every complete text message.
    #[must_use]
    pub fn on_text<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(WebSocket, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on_text = Some(Arc::new(move |socket, text| Box::pin(callback(socket, text))));
        self
    }

    /// Called for every complete binary message.
    #[must_use]
    pub fn on_binary<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(WebSocket, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on_binary = Some(Arc::new(move |socket, data| Box::pin(callback(socket, data))));
        self
    }

    /// Called once when the session ends, whoever ended it.
    #[must_use]
    pub fn on_close<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(WebSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_close = Some(Arc::new(move |socket| Box::pin(callback(socket))));
        self
    }
}

/// Sending side of an upgraded connection.
#[derive(Debug, Clone)]
pub struct WebSocket {
    conn: Connection,
}

impl WebSocket {
    fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Sends `text` as a single text frame.
    pub async fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        let frame = frame::encode_frame(Opcode::Text, true, text.as_bytes(), None);
        self.conn.send(&frame).await
    }

    /// Sends `data` as a binary message, fragmented into frames of at most
    /// [`MAX_CHUNK`] bytes.
    pub async fn send_binary(&self, data: &[u8]) -> Result<(), ConnectionError> {
        let frames = frame::encode_fragmented(Opcode::Binary, data);
        self.conn.send_chunks(&frames[..]).await
    }

    /// Sends a ping; `payload` must fit in a control frame.
    pub async fn ping(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        self.send_control(Opcode::Ping, payload).await
    }

    /// Sends a normal-closure close frame and closes the connection.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let result = self
            .send_control(Opcode::Close, &1000u16.to_be_bytes())
            .await;
        self.conn.close();
        result
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn send_control(&self, opcode: Opcode, payload: &[u8]) -> Result<(), ConnectionError> {
        if payload.len() > frame::MAX_CONTROL_PAYLOAD {
            return Err(ConnectionError::InvalidBuffer);
        }
        let frame = frame::encode_frame(opcode, true, payload, None);
        self.conn.send(&frame).await
    }
}

/// Completes the handshake for `request` and switches `conn` to WebSocket
/// once the calling handler returns.
///
/// # Examples
///
/// ```rust,no_run
/// use spindle::websocket::{self, WebSocketHandlers};
/// use spindle::{Connection, HandlerError, Request, Router};
///
/// let mut router = Router::new();
/// router.get("/echo", |req: Request, conn: Connection| async move {
///     let handlers = WebSocketHandlers::new().on_text(|socket, text| async move {
///         socket.send_text(&text).await?;
///         Ok::<_, HandlerError>(())
///     });
///     websocket::upgrade(&req, &conn, handlers).await?;
///     Ok::<_, HandlerError>(())
/// });
/// ```
///
/// # Errors
///
/// An [`UpgradeError`] when the request is not a valid upgrade request (no
/// response is sent in that case) or when the `101` cannot be sent.
pub async fn upgrade(
    request: &Request,
    conn: &Connection,
    handlers: WebSocketHandlers,
) -> Result<WebSocket, UpgradeError> {
    let handshake = handshake::validate(request)?;
    conn.send_response(handshake.response()).await?;
    conn.set_upgrade(handlers);
    debug!(conn = conn.id(), version = handshake.version(), "websocket handshake complete");
    Ok(WebSocket::new(conn.clone()))
}

/// Receiving side of an upgraded connection: frame buffer, fragment
/// reassembly and callback dispatch.
pub(crate) struct Session {
    socket: WebSocket,
    handlers: WebSocketHandlers,
    buf: BytesMut,
    // Opcode and data of a fragmented message in progress.
    partial: Option<(Opcode, BytesMut)>,
    max_message: usize,
}

impl Session {
    pub(crate) fn new(
        conn: Connection,
        handlers: WebSocketHandlers,
        leftovers: BytesMut,
        max_message: usize,
    ) -> Self {
        Self {
            socket: WebSocket::new(conn),
            handlers,
            buf: leftovers,
            partial: None,
            max_message,
        }
    }

    /// Buffers `chunk` and handles every complete frame.
    ///
    /// Returns `false` once the session must end.
    pub(crate) async fn receive(&mut self, chunk: &[u8]) -> bool {
        self.buf.extend_from_slice(chunk);

        loop {
            let header = match frame::decode_header(&self.buf) {
                Ok(Some(header)) => header,
                Ok(None) => return true,
                Err(e) => {
                    warn!(conn = self.socket.conn.id(), error = %e, "invalid websocket frame; closing");
                    return false;
                }
            };
            if !self.admits(&header) {
                return false;
            }

            let (opcode, fin, header_len, used) = match frame::decode(&mut self.buf) {
                Ok(Some((frame, used))) => {
                    (frame.opcode, frame.fin, used - frame.payload.len(), used)
                }
                Ok(None) => return true,
                Err(e) => {
                    warn!(conn = self.socket.conn.id(), error = %e, "invalid websocket frame; closing");
                    return false;
                }
            };
            let payload = self.buf.split_to(used).freeze().slice(header_len..);

            if !self.handle(opcode, fin, payload).await || self.socket.is_closed() {
                return false;
            }
        }
    }

    // Rejects a frame from its header alone, before its payload is buffered.
    fn admits(&self, header: &FrameHeader) -> bool {
        let declared = header.payload_len;
        if header.opcode.is_control() {
            if !header.fin || declared > frame::MAX_CONTROL_PAYLOAD as u64 {
                warn!(conn = self.socket.conn.id(), opcode = ?header.opcode, "oversized or fragmented control frame; closing");
                return false;
            }
            return true;
        }

        let buffered = match (&self.partial, header.opcode) {
            (Some((_, data)), Opcode::Continuation) => data.len(),
            _ => 0,
        };
        let room = self.max_message.saturating_sub(buffered) as u64;
        if declared > room {
            warn!(
                conn = self.socket.conn.id(),
                declared,
                limit = self.max_message,
                "websocket frame exceeds message limit; closing"
            );
            return false;
        }
        true
    }

    async fn handle(&mut self, opcode: Opcode, fin: bool, payload: Bytes) -> bool {
        match opcode {
            Opcode::Ping => self.socket.send_control(Opcode::Pong, &payload).await.is_ok(),
            Opcode::Pong => true,
            Opcode::Close => {
                debug!(conn = self.socket.conn.id(), "close frame received");
                // Echo the status code, if any.
                let code = payload.get(..2).unwrap_or_default();
                if let Err(e) = self.socket.send_control(Opcode::Close, code).await {
                    debug!(conn = self.socket.conn.id(), error = %e, "could not answer close frame");
                }
                false
            }
            Opcode::Text | Opcode::Binary => {
                if self.partial.is_some() {
                    warn!(conn = self.socket.conn.id(), "new message inside a fragmented one; closing");
                    return false;
                }
                if fin {
                    return self.deliver(opcode, payload).await;
                }
                if payload.len() > self.max_message {
                    return self.too_large();
                }
                self.partial = Some((opcode, BytesMut::from(&payload[..])));
                true
            }
            Opcode::Continuation => {
                let Some((_, data)) = self.partial.as_mut() else {
                    warn!(conn = self.socket.conn.id(), "continuation without a message; closing");
                    return false;
                };
                if data.len() + payload.len() > self.max_message {
                    return self.too_large();
                }
                data.extend_from_slice(&payload);
                if !fin {
                    return true;
                }
                match self.partial.take() {
                    Some((first, data)) => self.deliver(first, data.freeze()).await,
                    None => false,
                }
            }
        }
    }

    async fn deliver(&self, opcode: Opcode, payload: Bytes) -> bool {
        if payload.len() > self.max_message {
            return self.too_large();
        }

        let socket = self.socket.clone();
        let result = match opcode {
            Opcode::Text => {
                let Ok(text) = String::from_utf8(payload.to_vec()) else {
                    warn!(conn = self.socket.conn.id(), "text message is not valid UTF-8; closing");
                    return false;
                };
                match &self.handlers.on_text {
                    Some(callback) => callback(socket, text).await,
                    None => Ok(()),
                }
            }
            Opcode::Binary => match &self.handlers.on_binary {
                Some(callback) => callback(socket, payload).await,
                None => Ok(()),
            },
            _ => Ok(()),
        };

        if let Err(e) = result {
            warn!(conn = self.socket.conn.id(), error = %e, "websocket callback failed; closing");
            return false;
        }
        true
    }

    fn too_large(&self) -> bool {
        warn!(
            conn = self.socket.conn.id(),
            limit = self.max_message,
            "websocket message too large; closing"
        );
        false
    }

    /// Runs the close callback.
    pub(crate) async fn finish(self) {
        if let Some(callback) = self.handlers.on_close {
            callback(self.socket).await;
        }
    }
}
