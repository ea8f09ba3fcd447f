//! WebSocket endpoint for live dashboards.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::broadcaster::{ChannelConnection, Connection, RoomBroadcaster};
use super::protocol::{is_valid_room, ClientMessage};

#[derive(Clone)]
pub struct RealtimeState {
    pub broadcaster: Arc<RoomBroadcaster>,
    /// Per-connection outbound queue length.
    pub outbound_buffer: usize,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RealtimeState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RealtimeState) {
    let broadcaster = state.broadcaster;
    let id = broadcaster.next_connection_id();
    let (tx, mut outbound) = mpsc::channel::<Arc<str>>(state.outbound_buffer.max(1));
    let conn: Arc<dyn Connection> = Arc::new(ChannelConnection::new(id, tx));

    debug!(connection = id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            Some(payload) = outbound.recv() => {
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&broadcaster, &conn, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(connection = id, error = %err, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    broadcaster.leave_all(id);
    debug!(connection = id, "WebSocket disconnected");
}

fn handle_client_message(broadcaster: &RoomBroadcaster, conn: &Arc<dyn Connection>, text: &str) {
    match ClientMessage::parse(text) {
        Some(ClientMessage::Subscribe { room }) if is_valid_room(&room) => {
            broadcaster.join(&room, conn.clone());
        }
        Some(ClientMessage::Unsubscribe { room }) => {
            broadcaster.leave(&room, conn.id());
        }
        _ => trace!(connection = conn.id(), "Ignoring client message"),
    }
}
