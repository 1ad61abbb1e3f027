//! # WebSocket Relay
//!
//! Upgrade requests on the socket path are relayed frame-by-frame to the chat backend.
//! The gateway does not interpret the traffic; it only opens the upstream socket, pipes both
//! directions, and closes both sides when either one ends.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::Uri;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{debug, info, instrument, warn};

use crate::discovery::ServiceRegistry;
use crate::protocols::http::ForwardContext;

/// Close code sent when an upgrade arrives on a path that is not relayed
pub const POLICY_VIOLATION: u16 = 1008;

/// Relays client sockets to the WebSocket-capable backend
pub struct WebSocketRelay {
    registry: Arc<ServiceRegistry>,
    path: String,
}

impl WebSocketRelay {
    pub fn new(registry: Arc<ServiceRegistry>, path: impl Into<String>) -> Self {
        Self {
            registry,
            path: path.into(),
        }
    }

    /// Whether upgrades on `path` are relayed
    pub fn accepts(&self, path: &str) -> bool {
        path == self.path
            || path
                .strip_prefix(self.path.as_str())
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }

    /// Upstream `ws://` URL for an inbound URI, or `None` if no backend accepts sockets
    pub fn upstream_url(&self, uri: &Uri) -> Option<(String, String, Duration)> {
        let target = self.registry.websocket_target()?;
        let base = if let Some(rest) = target.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = target.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            target.base_url.clone()
        };
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Some((target.name.clone(), format!("{}{}", base, path_and_query), target.timeout))
    }

    /// Accept the upgrade and relay, or close at once if the path is not relayed
    pub fn upgrade(self: Arc<Self>, ws: WebSocketUpgrade, uri: Uri, ctx: ForwardContext) -> Response {
        if !self.accepts(uri.path()) {
            warn!(path = %uri.path(), "Refusing WebSocket upgrade on non-socket path");
            return ws.on_upgrade(|socket| refuse(socket));
        }

        ws.on_upgrade(move |socket| async move { self.relay(socket, uri, ctx).await })
    }

    #[instrument(skip(self, client, ctx), fields(request_id = %ctx.request_id))]
    async fn relay(&self, mut client: WebSocket, uri: Uri, ctx: ForwardContext) {
        let Some((service, url, timeout)) = self.upstream_url(&uri) else {
            warn!("No WebSocket-capable backend registered");
            let _ = client.send(Message::Close(None)).await;
            return;
        };

        let request = match build_upstream_request(&url, &ctx) {
            Ok(request) => request,
            Err(e) => {
                warn!(%url, error = %e, "Invalid upstream WebSocket URL");
                let _ = client.send(Message::Close(None)).await;
                return;
            }
        };

        let upstream = match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await {
            Ok(Ok((stream, _))) => {
                self.registry.mark_healthy(&service);
                stream
            }
            Ok(Err(e)) => {
                self.registry.mark_unhealthy(&service, &e.to_string());
                warn!(service = %service, error = %e, "Upstream WebSocket connect failed");
                let _ = client.send(Message::Close(None)).await;
                return;
            }
            Err(_) => {
                self.registry.mark_unhealthy(&service, "websocket connect timed out");
                warn!(service = %service, "Upstream WebSocket connect timed out");
                let _ = client.send(Message::Close(None)).await;
                return;
            }
        };

        info!(service = %service, "WebSocket relay established");

        let (mut client_tx, mut client_rx) = client.split();
        let (mut upstream_tx, mut upstream_rx) = upstream.split();

        let client_to_upstream = async {
            while let Some(Ok(message)) = client_rx.next().await {
                let closing = matches!(message, Message::Close(_));
                if upstream_tx.send(to_upstream(message)).await.is_err() || closing {
                    break;
                }
            }
            let _ = upstream_tx.close().await;
        };

        let upstream_to_client = async {
            while let Some(Ok(message)) = upstream_rx.next().await {
                let Some(message) = from_upstream(message) else {
                    continue;
                };
                let closing = matches!(message, Message::Close(_));
                if client_tx.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = client_tx.close().await;
        };

        tokio::select! {
            _ = client_to_upstream => debug!("Client side of relay ended"),
            _ = upstream_to_client => debug!("Upstream side of relay ended"),
        }

        info!(service = %service, "WebSocket relay closed");
    }
}

async fn refuse(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: POLICY_VIOLATION,
            reason: "WebSocket not supported on this path".into(),
        })))
        .await;
}

fn build_upstream_request(
    url: &str,
    ctx: &ForwardContext,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();

    let mut set = |name: &'static str, value: &str| {
        if let Ok(value) = value.parse::<HeaderValue>() {
            headers.insert(name, value);
        }
    };
    for (name, value) in ctx.trust_headers() {
        set(name, &value);
    }

    Ok(request)
}

fn to_upstream(message: Message) -> UpstreamMessage {
    match message {
        Message::Text(text) => UpstreamMessage::Text(text),
        Message::Binary(data) => UpstreamMessage::Binary(data),
        Message::Ping(data) => UpstreamMessage::Ping(data),
        Message::Pong(data) => UpstreamMessage::Pong(data),
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason,
        })),
    }
}

fn from_upstream(message: UpstreamMessage) -> Option<Message> {
    match message {
        UpstreamMessage::Text(text) => Some(Message::Text(text)),
        UpstreamMessage::Binary(data) => Some(Message::Binary(data)),
        UpstreamMessage::Ping(data) => Some(Message::Ping(data)),
        UpstreamMessage::Pong(data) => Some(Message::Pong(data)),
        UpstreamMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason,
        }))),
        UpstreamMessage::Frame(_) => None,
    }
}
