//! ---
//! bc_section: "04-networking-external-interfaces"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Live vehicle position stream over WebSocket."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use buscast_core::{keepalive_reply, ChannelSubscriber};
use tracing::{debug, warn};

use crate::server::ApiState;

pub(crate) async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

/// Prime the client, then forward every broadcast until either side goes away.
async fn client_loop(mut socket: WebSocket, state: Arc<ApiState>) {
    let (subscriber, mut outbound) =
        ChannelSubscriber::channel(state.subscriber_buffer, state.send_timeout);
    let id = match state.service.connect(Arc::new(subscriber)).await {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "failed to prime websocket client");
            return;
        }
    };
    debug!(subscriber = %id, "websocket client connected");

    loop {
        tokio::select! {
            message = outbound.recv() => {
                // the hub dropped this subscriber after a failed send
                let Some(message) = message else {
                    break;
                };
                if socket.send(Message::Text(message.to_string())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                let Some(Ok(inbound)) = inbound else {
                    break;
                };
                match inbound {
                    Message::Text(text) => {
                        if let Some(reply) = keepalive_reply(&text) {
                            if socket.send(Message::Text(reply.to_owned())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Binary(_) | Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    state.service.disconnect(id);
    debug!(subscriber = %id, "websocket client disconnected");
}
