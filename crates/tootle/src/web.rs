//! HTTP and WebSocket endpoints.
//!
//! The WebSocket protocol is served on `/`, `/ws` and `/stream`. A plain GET
//! on `/` returns a discovery document instead.

use crate::context::ServiceContext;
use crate::error::ConnectionError;
use crate::keepalive::{Keepalive, KeepaliveAction};
use crate::session::{Connection, MessageSink};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

pub fn router(context: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/health", get(health))
        .route("/ws", get(upgrade))
        .route("/stream", get(upgrade))
        .with_state(context)
}

/// Serve until the context's shutdown token fires.
pub async fn serve(listener: TcpListener, context: Arc<ServiceContext>) -> std::io::Result<()> {
    let shutdown = context.shutdown_token().clone();
    axum::serve(listener, router(context))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn serve_root(
    State(context): State<Arc<ServiceContext>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, context))
            .into_response(),
        Err(_) => Json(serde_json::json!({
            "name": "tootle",
            "version": env!("CARGO_PKG_VERSION"),
            "links": {
                "websocket": ["/", "/ws", "/stream"],
                "health": "/health",
            }
        }))
        .into_response(),
    }
}

async fn health(State(context): State<Arc<ServiceContext>>) -> Json<serde_json::Value> {
    let tokenizer = context.tokenizer();
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": context.uptime().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": context.active_sessions(),
        "tokenizer": {
            "version": tokenizer.version().to_string(),
            "vocab_size": tokenizer.vocab_size(),
        }
    }))
}

async fn upgrade(
    State(context): State<Arc<ServiceContext>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, context))
}

struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Send(e.to_string()))
    }
}

async fn handle_socket(socket: WebSocket, context: Arc<ServiceContext>) {
    let _guard = context.session_guard();
    let span = tracing::info_span!("ws.connection");
    tracing::info!(parent: &span, active_sessions = context.active_sessions(), "client connected");

    let (sender, mut receiver) = socket.split();
    let mut sink = WsSink { sender };
    let mut connection = Connection::new(context.clone());

    let reason = run_connection(&context, &mut connection, &mut receiver, &mut sink).await;
    connection.shutdown();

    match &reason {
        ConnectionError::Closed | ConnectionError::Shutdown => {
            tracing::info!(parent: &span, reason = %reason, "client disconnected")
        }
        _ => tracing::warn!(parent: &span, reason = %reason, "connection dropped"),
    }

    let close_timeout = context.config().session.close_timeout();
    let close = async {
        let _ = sink.sender.send(Message::Close(None)).await;
        let _ = sink.sender.close().await;
    };
    if tokio::time::timeout(close_timeout, close).await.is_err() {
        tracing::debug!(parent: &span, "close handshake timed out");
    }
}

/// Run the connection loop; returns why it stopped.
async fn run_connection(
    context: &ServiceContext,
    connection: &mut Connection,
    receiver: &mut SplitStream<WebSocket>,
    sink: &mut WsSink,
) -> ConnectionError {
    let mut keepalive = Keepalive::from_config(&context.config().session);
    let mut ticker = keepalive.ticker();
    let cancel = connection.cancel_token().clone();

    loop {
        // A buffered pong must be seen before a due tick.
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectionError::Shutdown),
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => connection.handle_text(text.as_str(), sink).await,
                Some(Ok(Message::Pong(_))) => {
                    keepalive.on_pong();
                    Ok(())
                }
                Some(Ok(Message::Ping(_))) => Ok(()),
                Some(Ok(Message::Binary(_))) => connection.handle_binary(sink).await,
                Some(Ok(Message::Close(_))) | None => Err(ConnectionError::Closed),
                Some(Err(e)) => Err(ConnectionError::Receive(e.to_string())),
            },
            _ = ticker.tick() => match keepalive.on_tick(Instant::now()) {
                KeepaliveAction::SendPing => sink
                    .sender
                    .send(Message::Ping(Default::default()))
                    .await
                    .map_err(|e| ConnectionError::Send(e.to_string())),
                KeepaliveAction::Wait => Ok(()),
                KeepaliveAction::TimedOut => Err(ConnectionError::KeepaliveTimeout(keepalive.timeout())),
            },
            message = connection.next_worker_message(), if connection.is_streaming() => {
                connection.on_worker_message(message, sink).await
            }
        };

        if let Err(reason) = step {
            return reason;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use miditok::{HeuristicModel, MidiTokenizer, SamplingGenerator};
    use tootleconf::TootleConfig;
    use tower::ServiceExt;

    fn context() -> Arc<ServiceContext> {
        let generator = SamplingGenerator::new(MidiTokenizer::v2(), HeuristicModel::default());
        Arc::new(ServiceContext::new(TootleConfig::default(), Arc::new(generator)))
    }

    async fn get_json(path: &str) -> (StatusCode, serde_json::Value) {
        let response = router(context())
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_root_discovery() {
        let (status, body) = get_json("/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "tootle");
        assert_eq!(body["links"]["health"], "/health");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["active_sessions"], 0);
        assert_eq!(body["tokenizer"]["version"], "v2");
        assert!(body["tokenizer"]["vocab_size"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let response = router(context())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
