//! Subscriber WebSocket endpoint
//!
//! One socket per subscriber. Inbound messages: `wait_for_image`
//! registrations, `ping`/`pong` keepalives. Outbound: `image_processed`
//! deliveries from the registry, liveness pings, and pong replies.
//! Every inbound message refreshes the subscriber's activity timestamp;
//! the registry's liveness sweep disconnects subscribers that go silent.

use crate::registry::{ImageProcessedData, OutboundMessage};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Inbound subscriber message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    /// Register interest in an image+filter result
    WaitForImage { data: WaitForImageData },
    /// Client keepalive probe; answered with a pong
    Ping,
    /// Client reply to a server liveness ping
    Pong,
    /// Anything else is ignored
    #[serde(other)]
    Unknown,
}

/// `wait_for_image` payload
#[derive(Debug, Deserialize)]
struct WaitForImageData {
    image_url: String,
    #[serde(default)]
    filters: Vec<String>,
}

/// GET /ws/:subscriber_id - subscriber channel upgrade
pub async fn ws_endpoint(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    info!(subscriber_id = %subscriber_id, "WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(state, subscriber_id, socket))
}

/// Drive one subscriber connection to completion
async fn handle_socket(state: AppState, subscriber_id: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // Registry-side channel: deliveries and liveness pings arrive here
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    state.registry.connect(&subscriber_id, tx.clone()).await;

    // Writer task: forward registry messages onto the socket
    let writer_id = subscriber_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(subscriber_id = %writer_id, error = %e, "Outbound message encode failed");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                debug!(subscriber_id = %writer_id, "Socket closed while sending");
                break;
            }
        }
    });

    // Reader loop: registrations and keepalives
    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        // Any well-formed message counts as activity
        state.registry.update_activity(&subscriber_id).await;

        let inbound = match serde_json::from_str::<InboundMessage>(&text) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(subscriber_id = %subscriber_id, error = %e, "Unparseable message ignored");
                continue;
            }
        };

        match inbound {
            InboundMessage::WaitForImage { data } => {
                handle_wait_for_image(&state, &subscriber_id, &tx, data).await;
            }
            InboundMessage::Ping => {
                debug!(subscriber_id = %subscriber_id, "Client ping");
                tx.send(OutboundMessage::Pong {
                    timestamp: chrono::Utc::now().to_rfc3339(),
                })
                .ok();
            }
            InboundMessage::Pong => {
                debug!(subscriber_id = %subscriber_id, "Client pong");
            }
            InboundMessage::Unknown => {
                debug!(subscriber_id = %subscriber_id, "Unknown message type ignored");
            }
        }
    }

    state.registry.disconnect(&subscriber_id).await;
    writer.abort();
    info!(subscriber_id = %subscriber_id, "WebSocket closed");
}

/// Answer a wait request from the cache or register the wait
async fn handle_wait_for_image(
    state: &AppState,
    subscriber_id: &str,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    data: WaitForImageData,
) {
    info!(
        subscriber_id = %subscriber_id,
        image_url = %data.image_url,
        filters = ?data.filters,
        "wait_for_image received"
    );

    match state.cache.get(&data.image_url, &data.filters).await {
        Ok(Some(value)) => {
            // Already processed: answer synchronously, no registration
            let base64_url = value.base64().map(|s| s.to_string());
            let result = serde_json::to_value(&value).unwrap_or_default();
            tx.send(OutboundMessage::ImageProcessed {
                data: ImageProcessedData {
                    image_url: data.image_url,
                    result,
                    filters: data.filters,
                    base64_url,
                },
            })
            .ok();
        }
        Ok(None) => {
            state
                .registry
                .register_wait(subscriber_id, &data.image_url, data.filters)
                .await;
        }
        Err(e) => {
            warn!(
                subscriber_id = %subscriber_id,
                image_url = %data.image_url,
                error = %e,
                "Cache lookup failed, registering wait"
            );
            state
                .registry
                .register_wait(subscriber_id, &data.image_url, data.filters)
                .await;
        }
    }
}
