//! Presence registry: which identities are online, keyed by control connection.
//!
//! Every mutation rebroadcasts the full roster while the write lock is held, so
//! the snapshot a register/unregister produces always reflects exactly that
//! mutation and no broadcast can interleave with another change.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use duet_common::helpers::{is_valid_transport_id, is_valid_username};
use duet_common::{Error, Identity, Result, ServerMessage};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type SharedRegistry = Arc<PresenceRegistry>;

/// Outbox handle of one control connection.
#[derive(Clone)]
pub struct Signaler(mpsc::Sender<Message>);

impl Signaler {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self(tx)
    }

    /// Queue a message without waiting. A full or closed outbox drops it.
    pub fn try_send(&self, signal: &ServerMessage) -> bool {
        match serde_json::to_string(signal) {
            Ok(json) => self.try_send_text(json),
            Err(_) => false,
        }
    }

    pub fn try_send_text(&self, text: String) -> bool {
        self.0.try_send(Message::Text(text)).is_ok()
    }

    pub async fn send(&self, signal: &ServerMessage) -> bool {
        let Ok(json) = serde_json::to_string(signal) else {
            return false;
        };
        self.0.send(Message::Text(json)).await.is_ok()
    }
}

/// Outcome of a successful `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    /// The same identity was already bound to this connection.
    Unchanged,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Signaler>,
    // Insertion order is the roster order.
    identities: Vec<(ConnectionId, Identity)>,
}

impl Inner {
    fn roster(&self) -> Vec<Identity> {
        self.identities
            .iter()
            .map(|(_, identity)| identity.clone())
            .collect()
    }

    fn broadcast(&self) {
        let snapshot = ServerMessage::Users {
            users: self.roster(),
        };
        let Ok(json) = serde_json::to_string(&snapshot) else {
            return;
        };
        for (connection_id, signaler) in &self.connections {
            if !signaler.try_send_text(json.clone()) {
                warn!("failed to queue roster for connection {}", connection_id);
            }
        }
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    inner: RwLock<Inner>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an open control connection so it receives roster broadcasts.
    /// The new connection is sent the current snapshot straight away.
    pub async fn attach(&self, connection_id: ConnectionId, signaler: Signaler) {
        let mut guard = self.inner.write().await;
        let snapshot = ServerMessage::Users {
            users: guard.roster(),
        };
        if !signaler.try_send(&snapshot) {
            warn!("failed to queue initial roster for connection {}", connection_id);
        }
        guard.connections.insert(connection_id, signaler);
    }

    pub async fn register(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
    ) -> Result<Registration> {
        if !is_valid_username(&identity.username) {
            return Err(Error::protocol("invalid username"));
        }
        if !is_valid_transport_id(&identity.transport_id) {
            return Err(Error::protocol("invalid peerId"));
        }

        let mut guard = self.inner.write().await;
        if !guard.connections.contains_key(&connection_id) {
            return Err(Error::protocol("unknown control connection"));
        }

        if let Some((_, bound)) = guard.identities.iter().find(|(id, _)| *id == connection_id) {
            if *bound == identity {
                return Ok(Registration::Unchanged);
            }
            return Err(Error::protocol("connection already registered"));
        }

        if guard
            .identities
            .iter()
            .any(|(_, existing)| existing.transport_id == identity.transport_id)
        {
            return Err(Error::DuplicateTransportId(identity.transport_id));
        }

        info!(
            "registered {} as {} on connection {}",
            identity.username, identity.transport_id, connection_id
        );
        guard.identities.push((connection_id, identity));
        guard.broadcast();
        Ok(Registration::Added)
    }

    /// Forget a closed connection. Safe to call more than once.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Identity> {
        let mut guard = self.inner.write().await;
        guard.connections.remove(&connection_id);

        let position = guard
            .identities
            .iter()
            .position(|(id, _)| *id == connection_id)?;
        let (_, identity) = guard.identities.remove(position);
        info!(
            "unregistered {} ({}) from connection {}",
            identity.username, identity.transport_id, connection_id
        );
        guard.broadcast();
        Some(identity)
    }

    pub async fn broadcast_roster(&self) {
        self.inner.read().await.broadcast();
    }

    pub async fn roster(&self) -> Vec<Identity> {
        self.inner.read().await.roster()
    }

    pub async fn identity_of(&self, connection_id: ConnectionId) -> Option<Identity> {
        self.inner
            .read()
            .await
            .identities
            .iter()
            .find(|(id, _)| *id == connection_id)
            .map(|(_, identity)| identity.clone())
    }

    /// Outbox of the connection currently holding `transport_id`.
    pub async fn signaler_for(&self, transport_id: &str) -> Option<Signaler> {
        let guard = self.inner.read().await;
        let (connection_id, _) = guard
            .identities
            .iter()
            .find(|(_, identity)| identity.transport_id == transport_id)?;
        let signaler = guard.connections.get(connection_id).cloned();
        if signaler.is_none() {
            debug!("identity {} has no open connection", transport_id);
        }
        signaler
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn registered_count(&self) -> usize {
        self.inner.read().await.identities.len()
    }
}
