#![allow(dead_code)]

use std::net::SocketAddr;

use spindle::{Router, Server, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Starts a server on an ephemeral loopback port.
///
/// Dropping the returned sender stops the accept loop.
pub async fn start(router: Router, config: ServerConfig) -> (SocketAddr, oneshot::Sender<()>) {
    let server = Server::bind(config.with_hostname("127.0.0.1").with_port(0))
        .await
        .unwrap();
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(router, async {
        let _ = rx.await;
    }));
    (addr, tx)
}

pub struct HttpResponse {
    pub head: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn status(&self) -> u16 {
        self.head[9..12].parse().unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

/// A raw TCP client that keeps unread bytes between responses.
pub struct Client {
    pub stream: TcpStream,
    pub buf: Vec<u8>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Reads more bytes; returns `false` on EOF.
    pub async fn fill(&mut self) -> bool {
        let mut chunk = [0u8; 4096];
        let n = match self.stream.read(&mut chunk).await {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => 0,
            Err(e) => panic!("read failed: {e}"),
        };
        self.buf.extend_from_slice(&chunk[..n]);
        n > 0
    }

    pub async fn response(&mut self) -> HttpResponse {
        let head_end = loop {
            if let Some(pos) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            assert!(self.fill().await, "connection closed before a full head");
        };
        let head = String::from_utf8(self.buf[..head_end].to_vec()).unwrap();
        self.buf.drain(..head_end + 4);

        let mut response = HttpResponse {
            head,
            body: Vec::new(),
        };
        let length: usize = response
            .header("content-length")
            .map_or(0, |v| v.parse().unwrap());
        while self.buf.len() < length {
            assert!(self.fill().await, "connection closed before a full body");
        }
        response.body = self.buf.drain(..length).collect();
        response
    }

    /// Waits for the server to close the connection.
    pub async fn expect_eof(&mut self) {
        while self.fill().await {}
    }
}
