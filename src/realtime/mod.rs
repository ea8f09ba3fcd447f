//! Live fan-out of visit events to dashboard connections.

pub mod broadcaster;
pub mod client;
pub mod protocol;
pub mod ws;

pub use broadcaster::{
    BroadcastError, ChannelConnection, Connection, ConnectionId, PublishReport, RoomBroadcaster,
};
pub use client::{BackoffPolicy, ClientConfig, ClientUpdate, RealtimeClient};
pub use protocol::{is_valid_room, url_room, user_room, ClientMessage, ServerMessage};
pub use ws::{ws_handler, RealtimeState};
