//! Room registry fanning recorded events out to live dashboard connections.
//!
//! Rooms exist only while they have members. Publishing copies the member list
//! out of the map before sending, so joins and leaves never race the send loop,
//! and connections that fail during a publish are pruned once the loop is done.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::protocol::ServerMessage;

pub type ConnectionId = u64;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("outbound queue of connection {0} is full")]
    Backpressure(ConnectionId),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A live subscriber handle. Sending must not block.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn is_open(&self) -> bool;

    fn send(&self, payload: Arc<str>) -> Result<(), BroadcastError>;
}

/// Connection backed by a bounded queue drained by the socket writer task.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { id, tx }
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, payload: Arc<str>) -> Result<(), BroadcastError> {
        self.tx.try_send(payload).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => BroadcastError::Backpressure(self.id),
            mpsc::error::TrySendError::Closed(_) => BroadcastError::Closed(self.id),
        })
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub pruned: usize,
}

type Members = HashMap<ConnectionId, Arc<dyn Connection>>;

#[derive(Default)]
pub struct RoomBroadcaster {
    rooms: DashMap<String, Members>,
    /// Reverse index used to drop a connection from every room on disconnect.
    memberships: DashMap<ConnectionId, HashSet<String>>,
    next_id: AtomicU64,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a process-unique connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add `conn` to `room`, creating the room if needed. Joining twice is a no-op.
    pub fn join(&self, room: &str, conn: Arc<dyn Connection>) {
        let id = conn.id();
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(id, conn);
        self.memberships
            .entry(id)
            .or_default()
            .insert(room.to_string());

        debug!(room = %room, connection = id, "Joined room");
    }

    /// Remove a connection from `room`. Empty rooms are deleted.
    pub fn leave(&self, room: &str, id: ConnectionId) {
        self.remove_member(room, id);
        if let Some(mut rooms) = self.memberships.get_mut(&id) {
            rooms.remove(room);
        }
        self.memberships.remove_if(&id, |_, rooms| rooms.is_empty());
    }

    /// Remove a connection from every room it joined.
    pub fn leave_all(&self, id: ConnectionId) {
        let Some((_, rooms)) = self.memberships.remove(&id) else {
            return;
        };
        for room in &rooms {
            self.remove_member(room, id);
        }
        debug!(connection = id, rooms = rooms.len(), "Left all rooms");
    }

    fn remove_member(&self, room: &str, id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&id);
        }
        if self
            .rooms
            .remove_if(room, |_, members| members.is_empty())
            .is_some()
        {
            trace!(room = %room, "Removed empty room");
        }
    }

    /// Send `message` to every member of `room`.
    ///
    /// Dead or saturated connections are pruned after the send loop. Publishing
    /// to a room without members is a no-op. Only serialization can fail.
    pub fn publish(
        &self,
        room: &str,
        message: &ServerMessage,
    ) -> Result<PublishReport, BroadcastError> {
        let members: Vec<Arc<dyn Connection>> = match self.rooms.get(room) {
            Some(members) => members.values().cloned().collect(),
            None => return Ok(PublishReport::default()),
        };

        let payload: Arc<str> = serde_json::to_string(message)?.into();

        let mut report = PublishReport::default();
        let mut closed = Vec::new();
        let mut saturated = Vec::new();

        for conn in &members {
            if !conn.is_open() {
                closed.push(conn.id());
                continue;
            }
            match conn.send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(BroadcastError::Backpressure(id)) => {
                    warn!(room = %room, connection = id, "Dropping slow subscriber");
                    saturated.push(id);
                }
                Err(err) => {
                    debug!(room = %room, connection = conn.id(), error = %err, "Send failed");
                    closed.push(conn.id());
                }
            }
        }

        for id in &closed {
            self.leave_all(*id);
        }
        for id in &saturated {
            self.leave(room, *id);
        }
        report.pruned = closed.len() + saturated.len();

        trace!(
            room = %room,
            delivered = report.delivered,
            pruned = report.pruned,
            "Published"
        );
        Ok(report)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }
}
