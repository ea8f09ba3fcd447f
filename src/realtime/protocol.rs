//! JSON wire protocol of the realtime channel.
//!
//! Client → server: `{"type":"subscribe","room":..}`, `{"type":"unsubscribe","room":..}`.
//! Server → client: `{"type":"event","data":<Event>}`. Anything else a client
//! sends is ignored.
//!
//! A websocket ping is answered after every frame sent before it has been
//! handled, so a client knows its subscriptions are live once the pong arrives.

use serde::{Deserialize, Serialize};

use crate::models::Event;

const MAX_ROOM_LENGTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { room: String },
    Unsubscribe { room: String },
}

impl ClientMessage {
    /// `None` for anything that is not a well-formed client message.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Event { data: Event },
}

/// Room carrying every visit of one short URL.
pub fn url_room(short_id: &str) -> String {
    format!("url:{short_id}")
}

/// Room carrying every visit of every URL owned by one user.
pub fn user_room(owner_id: &str) -> String {
    format!("user:{owner_id}")
}

pub fn is_valid_room(room: &str) -> bool {
    if room.len() > MAX_ROOM_LENGTH {
        return false;
    }
    match room.split_once(':') {
        Some(("url" | "user", key)) => !key.is_empty() && !key.chars().any(char::is_control),
        _ => false,
    }
}
