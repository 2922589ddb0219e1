//! Transport session adapter.
//!
//! Wraps a [`PeerBroker`] with the bookkeeping the rest of the client needs:
//! the local transport identity, one data session per peer with a send queue
//! that is flushed once the session opens, and error normalisation for the
//! media-session passthroughs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use duet_common::{CallMetadata, DataPayload, Error, Result};
use tracing::{debug, info, warn};

use crate::events::SessionId;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::ports::PeerBroker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState {
    Opening,
    Open,
}

#[derive(Debug)]
struct DataSession {
    id: SessionId,
    state: DataState,
    outbox: VecDeque<DataPayload>,
}

impl DataSession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: DataState::Opening,
            outbox: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default)]
struct SessionTable {
    local_id: Option<String>,
    /// Keyed by peer transport id.
    data: HashMap<String, DataSession>,
}

impl SessionTable {
    fn peer_of(&self, session: SessionId) -> Option<&str> {
        self.data
            .iter()
            .find(|(_, entry)| entry.id == session)
            .map(|(peer, _)| peer.as_str())
    }
}

pub struct TransportSession<B> {
    broker: Arc<B>,
    table: Arc<Mutex<SessionTable>>,
    connect_timeout: Duration,
}

impl<B> Clone for TransportSession<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            table: self.table.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

fn as_connection_error(err: Error) -> Error {
    match err {
        Error::Connection(_) => err,
        other => Error::connection(other),
    }
}

impl<B: PeerBroker> TransportSession<B> {
    pub fn new(broker: Arc<B>, connect_timeout: Duration) -> Self {
        Self {
            broker,
            table: Arc::new(Mutex::new(SessionTable::default())),
            connect_timeout,
        }
    }

    fn table(&self) -> MutexGuard<'_, SessionTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn local_id(&self) -> Option<String> {
        self.table().local_id.clone()
    }

    /// Acquire a transport identity. Subsequent calls return the same id.
    pub async fn open(&self) -> Result<String> {
        if let Some(id) = self.local_id() {
            return Ok(id);
        }
        let id = self.broker.open().await.map_err(|err| match err {
            Error::TransportInit(_) => err,
            other => Error::transport_init(other),
        })?;
        let mut table = self.table();
        let id = table.local_id.get_or_insert(id).clone();
        info!("transport identity {}", id);
        Ok(id)
    }

    // -- Data sessions --

    /// Open a data session to `peer_id`, or return the one already in place.
    pub async fn connect_data(&self, peer_id: &str) -> Result<SessionId> {
        let existing = self.table().data.get(peer_id).map(|entry| entry.id);
        if let Some(session) = existing {
            return Ok(session);
        }

        let session = tokio::time::timeout(self.connect_timeout, self.broker.connect_data(peer_id))
            .await
            .map_err(|_| {
                Error::connection(format!(
                    "timed out after {:?} connecting to {}",
                    self.connect_timeout, peer_id
                ))
            })?
            .map_err(as_connection_error)?;

        self.install(peer_id, session);
        debug!("data session {} to {} opening", session, peer_id);
        Ok(session)
    }

    /// Adopt a data session the peer opened to us, replacing any existing one.
    pub fn accept_incoming_data(&self, peer_id: &str, session: SessionId) {
        info!("incoming data session {} from {}", session, peer_id);
        self.install(peer_id, session);
    }

    /// Close any other session with `peer_id` and put `session` in its place.
    /// Payloads still queued on the replaced session move over in order.
    fn install(&self, peer_id: &str, session: SessionId) {
        let mut table = self.table();
        let outbox = match table.data.remove(peer_id) {
            Some(old) if old.id == session => {
                table.data.insert(peer_id.to_string(), old);
                return;
            }
            Some(old) => {
                self.broker.close_data(old.id);
                if !old.outbox.is_empty() {
                    debug!(
                        "moving {} queued payloads from session {} to {}",
                        old.outbox.len(),
                        old.id,
                        session
                    );
                }
                old.outbox
            }
            None => VecDeque::new(),
        };
        let mut entry = DataSession::new(session);
        entry.outbox = outbox;
        table.data.insert(peer_id.to_string(), entry);
    }

    /// Send now if the session is open, otherwise queue until it opens.
    pub fn send_data(&self, peer_id: &str, payload: DataPayload) -> Result<()> {
        let mut table = self.table();
        let entry = table
            .data
            .get_mut(peer_id)
            .ok_or_else(|| Error::not_connected(format!("no data session with {}", peer_id)))?;
        match entry.state {
            DataState::Opening => {
                entry.outbox.push_back(payload);
                Ok(())
            }
            DataState::Open => self.broker.send_data(entry.id, &payload),
        }
    }

    /// Flush the queue in submission order, then mark the session open.
    ///
    /// Returns the peer, or `None` for an unknown or already-open session. If a
    /// send fails, the unsent payloads stay queued and the session stays
    /// `Opening`.
    pub fn handle_data_opened(&self, session: SessionId) -> Result<Option<String>> {
        let mut table = self.table();
        let Some(peer) = table.peer_of(session).map(str::to_owned) else {
            debug!("open for unknown data session {}", session);
            return Ok(None);
        };
        let Some(entry) = table.data.get_mut(&peer) else {
            return Ok(None);
        };
        if entry.state == DataState::Open {
            return Ok(None);
        }

        let mut queued = std::mem::take(&mut entry.outbox);
        if !queued.is_empty() {
            debug!("flushing {} queued payloads to {}", queued.len(), peer);
        }
        while let Some(payload) = queued.front() {
            if let Err(err) = self.broker.send_data(session, payload) {
                // The failed payload stays at the head; a later open retries.
                entry.outbox = queued;
                return Err(err);
            }
            queued.pop_front();
        }
        entry.state = DataState::Open;
        Ok(Some(peer))
    }

    /// Forget a session the broker reported closed. Returns its peer.
    pub fn handle_data_closed(&self, session: SessionId) -> Option<String> {
        let mut table = self.table();
        let peer = table.peer_of(session)?.to_owned();
        if let Some(entry) = table.data.remove(&peer) {
            if !entry.outbox.is_empty() {
                warn!(
                    "data session {} closed with {} unsent payloads",
                    session,
                    entry.outbox.len()
                );
            }
        }
        info!("data session {} with {} closed", session, peer);
        Some(peer)
    }

    pub fn close_data(&self, peer_id: &str) {
        let removed = self.table().data.remove(peer_id);
        if let Some(entry) = removed {
            self.broker.close_data(entry.id);
        }
    }

    pub fn data_state(&self, peer_id: &str) -> Option<DataState> {
        self.table().data.get(peer_id).map(|entry| entry.state)
    }

    pub fn peer_for_data(&self, session: SessionId) -> Option<String> {
        self.table().peer_of(session).map(str::to_owned)
    }

    pub fn queued(&self, peer_id: &str) -> usize {
        self.table()
            .data
            .get(peer_id)
            .map_or(0, |entry| entry.outbox.len())
    }

    // -- Media sessions --

    pub async fn call(
        &self,
        peer_id: &str,
        local: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<SessionId> {
        self.broker
            .call(peer_id, local, metadata)
            .await
            .map_err(as_connection_error)
    }

    pub async fn answer(&self, session: SessionId, local: &MediaStream) -> Result<()> {
        self.broker
            .answer(session, local)
            .await
            .map_err(as_connection_error)
    }

    pub fn close_media(&self, session: SessionId) {
        self.broker.close_media(session);
    }

    pub fn has_live_connection(&self, session: SessionId) -> bool {
        self.broker.has_live_connection(session)
    }

    pub async fn replace_track(&self, session: SessionId, track: &MediaTrack) -> Result<bool> {
        self.broker.replace_track(session, track).await
    }

    pub async fn add_track(
        &self,
        session: SessionId,
        track: &MediaTrack,
        stream: &MediaStream,
    ) -> Result<()> {
        self.broker
            .add_track(session, track, stream)
            .await
            .map_err(as_connection_error)
    }

    pub async fn remove_track(&self, session: SessionId, kind: TrackKind) -> Result<()> {
        self.broker.remove_track(session, kind).await
    }
}
