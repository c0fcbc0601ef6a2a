/// Axum server lifecycle
///
/// Binding is split from serving so the service can fail fast on a bad
/// address before spawning the background task.
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use super::connection::handle_connection;
use super::state::WebState;
use crate::logger::{self, LogTag};

pub fn build_app(state: WebState) -> Router {
    Router::new()
        .route("/ws", get(ws_default))
        .route("/ws/:channel", get(ws_channel))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn ws_default(ws: WebSocketUpgrade, State(state): State<WebState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, None))
}

async fn ws_channel(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<WebState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, Some(channel)))
}

async fn metrics(State(state): State<WebState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "hub": state.hub.metrics().snapshot(),
        "channels": state.hub.channels(),
        "telemetry": state.pipeline.stats(),
        "jobs_pending": state.jobs.pending(),
    });
    ([(header::CONTENT_TYPE, "application/json")], body.to_string())
}

/// Bind the listener, with readable errors for the common failures
pub async fn bind(addr: &str) -> Result<TcpListener, String> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| format!("Invalid bind address '{}': {}", addr, e))?;

    TcpListener::bind(&addr).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::AddrInUse => format!(
            "Failed to bind to {}: address already in use (another fleetlink instance running?)",
            addr
        ),
        std::io::ErrorKind::PermissionDenied => format!(
            "Failed to bind to {}: permission denied, use a port above 1024",
            addr
        ),
        _ => format!("Failed to bind to {}: {}", addr, e),
    })
}

/// Serve until shutdown is signalled
pub async fn serve(listener: TcpListener, state: WebState, shutdown: Arc<Notify>) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    logger::info(LogTag::Websocket, &format!("Listening on ws://{}/ws", local));

    let app = build_app(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await;

    match result {
        Ok(()) => logger::info(LogTag::Websocket, "Webserver stopped"),
        Err(e) => logger::error(LogTag::Websocket, &format!("Webserver failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::config::Config;
    use std::time::Duration;

    fn state() -> WebState {
        let mut config = Config::default();
        config.database.path = String::new();
        let app = App::build(config).expect("build");
        WebState {
            hub: app.hub.clone(),
            commands: Some(app.commands.clone()),
            pipeline: app.pipeline.clone(),
            jobs: app.jobs.clone(),
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let err = bind("not-an-address").await.expect_err("invalid address");
        assert!(err.starts_with("Invalid bind address"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = bind("127.0.0.1:0").await.expect("bind");
        let shutdown = Arc::new(Notify::new());
        let server = tokio::spawn(serve(listener, state(), shutdown.clone()));

        // Stored permit, so the signal is not lost if serve has not polled yet
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server stops in time")
            .expect("server task");
    }
}
