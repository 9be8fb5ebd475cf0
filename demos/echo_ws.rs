//! WebSocket echo server.
//!
//! ```text
//! cargo run --example echo_ws
//! websocat ws://127.0.0.1:8080/echo
//! ```

use spindle::websocket::{self, WebSocketHandlers};
use spindle::{Connection, HandlerError, Request, Router, Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spindle=debug,echo_ws=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut router = Router::new();
    router.get("/echo", |req: Request, conn: Connection| async move {
        let handlers = WebSocketHandlers::new()
            .on_text(|socket, text| async move {
                socket.send_text(&text).await?;
                Ok::<_, HandlerError>(())
            })
            .on_binary(|socket, data| async move {
                socket.send_binary(&data).await?;
                Ok::<_, HandlerError>(())
            })
            .on_close(|socket| async move {
                tracing::info!(conn = socket.connection().id(), "echo session ended");
            });

        websocket::upgrade(&req, &conn, handlers).await?;
        Ok::<_, HandlerError>(())
    });

    let server = Server::bind(ServerConfig::default().with_hostname("127.0.0.1")).await?;
    tracing::info!(address = %server.local_addr(), "echo_ws ready");

    server
        .run_until(router, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
