//! Connection registry for realtime broadcast rooms
//!
//! Tracks live WebSocket connections, the identity bound to each one after a
//! successful handshake, and per-conversation room memberships. Publishing to
//! a room takes a snapshot of its members and pushes the event onto each
//! connection's unbounded channel, so one slow viewer can never stall the
//! publisher or the other viewers.

use crate::chat::Message;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Events emitted to realtime clients
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Handshake succeeded; the connection is now bound to an identity
    Authenticated {
        /// The identity bound to the connection
        identity: String,
    },
    /// Handshake failed; the connection will be closed
    AuthError {
        /// Why the handshake failed
        reason: String,
    },
    /// The connection joined a conversation's room
    JoinedChat {
        /// The conversation whose room was joined
        conversation_id: String,
    },
    /// The connection left a conversation's room
    LeftChat {
        /// The conversation whose room was left
        conversation_id: String,
    },
    /// A join/leave request failed; connection state is unchanged
    Error {
        /// Why the request failed
        reason: String,
    },
    /// A message was persisted in a conversation this connection watches
    Message {
        /// The persisted message (user or assistant)
        message: Message,
    },
}

/// Room name for a conversation's broadcast group
pub fn chat_room(conversation_id: &str) -> String {
    format!("chat:{}", conversation_id)
}

struct ConnectionEntry {
    identity: Option<String>,
    sender: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<String, ConnectionEntry>,
    rooms: HashMap<String, HashSet<String>>,
}

/// Registry of live realtime connections and their room memberships
///
/// All mutation and iteration happens under one `RwLock`, which makes
/// disconnect atomic with respect to concurrent publishes: a publish either
/// sees a connection with all its memberships or not at all.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, unauthenticated connection
    ///
    /// `sender` is the connection's outbound event channel; events published
    /// to rooms the connection joins are pushed onto it.
    pub async fn register(&self, sender: mpsc::UnboundedSender<ServerEvent>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            id.clone(),
            ConnectionEntry {
                identity: None,
                sender,
                rooms: HashSet::new(),
            },
        );
        debug!(connection_id = %id, "Registered realtime connection");
        id
    }

    /// Bind an identity to a connection after a successful handshake
    pub async fn authenticate(&self, connection_id: &str, identity: String) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.get_mut(connection_id) {
            entry.identity = Some(identity);
        }
    }

    /// Identity bound to a connection, if the handshake has happened
    pub async fn identity(&self, connection_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(connection_id)?
            .identity
            .clone()
    }

    /// Add a room membership to an authenticated connection
    ///
    /// Ownership of the underlying conversation must already have been
    /// checked by the caller. Fails without altering state when the
    /// connection is unknown or not yet authenticated.
    pub async fn join(&self, connection_id: &str, room: &str) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(connection_id)
            .filter(|e| e.identity.is_some())
            .ok_or_else(|| {
                AppError::Unauthenticated("Connection is not authenticated".to_string())
            })?;

        entry.rooms.insert(room.to_string());
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string());

        debug!(connection_id = %connection_id, room = %room, "Connection joined room");
        Ok(())
    }

    /// Remove a room membership; leaving a room not joined is a no-op
    pub async fn leave(&self, connection_id: &str, room: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.get_mut(connection_id) {
            entry.rooms.remove(room);
        }
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(connection_id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    /// Deliver an event to every connection currently in a room
    ///
    /// Membership is a snapshot at call time. Delivery is best-effort: a
    /// closed channel is logged and skipped. Returns the number of
    /// connections the event was handed to.
    pub async fn publish(&self, room: &str, event: ServerEvent) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for connection_id in members {
            if let Some(entry) = inner.connections.get(connection_id) {
                if entry.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    warn!(
                        connection_id = %connection_id,
                        room = %room,
                        "Failed to deliver event to connection"
                    );
                }
            }
        }
        delivered
    }

    /// Remove a connection and all its room memberships
    ///
    /// Atomic with respect to concurrent publishes: both sides are removed
    /// under one write lock.
    pub async fn disconnect(&self, connection_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.remove(connection_id) {
            for room in entry.rooms {
                if let Some(members) = inner.rooms.get_mut(&room) {
                    members.remove(connection_id);
                    if members.is_empty() {
                        inner.rooms.remove(&room);
                    }
                }
            }
        }
        debug!(connection_id = %connection_id, "Removed realtime connection");
    }
}
