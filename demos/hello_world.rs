//! Minimal HTTP server.
//!
//! ```text
//! cargo run --example hello_world
//! curl http://127.0.0.1:8080/hello/ferris
//! curl -X POST -d '{"name":"ferris"}' http://127.0.0.1:8080/echo
//! ```
//!
//! Set `SPINDLE_CONFIG` to a JSON file to override the defaults.

use serde::{Deserialize, Serialize};
use spindle::{Connection, HandlerError, Request, Response, Router, Server, ServerConfig, StatusCode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Deserialize, Serialize)]
struct Greeting {
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spindle=debug,hello_world=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("SPINDLE_CONFIG") {
        Ok(path) => ServerConfig::from_json_file(path)?,
        Err(_) => ServerConfig::default().with_hostname("127.0.0.1"),
    };

    let mut router = Router::new();

    router.get("/", |_req: Request, conn: Connection| async move {
        conn.send_response(Response::new(StatusCode::Ok).body("Hello, World!"))
            .await?;
        Ok::<_, HandlerError>(())
    });

    router.get("/hello/:name", |req: Request, conn: Connection| async move {
        let name = req.token("name").unwrap_or("stranger").to_owned();
        let greeting = req
            .query()
            .get("greeting")
            .map(|g| g.into_owned())
            .unwrap_or_else(|| "Hello".to_owned());
        conn.send_response(Response::new(StatusCode::Ok).body(format!("{greeting}, {name}!")))
            .await?;
        Ok::<_, HandlerError>(())
    });

    router.get("/square/:n", |req: Request, conn: Connection| async move {
        let response = match req.extract::<i64>("n") {
            Ok(n) => Response::new(StatusCode::Ok).body(n.saturating_mul(n).to_string()),
            Err(e) => Response::new(StatusCode::BadRequest).body(e.to_string()),
        };
        conn.send_response(response).await?;
        Ok::<_, HandlerError>(())
    });

    router.post("/echo", |req: Request, conn: Connection| async move {
        let response = match req.json::<Greeting>() {
            Ok(greeting) => Response::new(StatusCode::Ok).json(&greeting)?,
            Err(e) => Response::new(StatusCode::BadRequest).body(format!("invalid JSON: {e}")),
        };
        conn.send_response(response).await?;
        Ok::<_, HandlerError>(())
    });

    router.fallback("/static", |req: Request, conn: Connection| async move {
        let body = format!("nothing under {}", req.path());
        conn.send_response(Response::new(StatusCode::NotFound).body(body))
            .await?;
        Ok::<_, HandlerError>(())
    });

    let server = Server::bind(config).await?;
    tracing::info!(address = %server.local_addr(), "hello_world ready");

    server
        .run_until(router, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
