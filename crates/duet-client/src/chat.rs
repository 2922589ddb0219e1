//! Text chat over a data session, independent of call state.

use duet_common::helpers::now_millis;
use duet_common::{DataPayload, Error, Result};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::{ErrorReporter, SessionId};
use crate::ports::PeerBroker;
use crate::transport::TransportSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub direction: Direction,
    /// Transport id of the other side.
    pub peer: String,
    pub body: String,
    pub sent_at_millis: i64,
}

pub struct ChatChannel<B> {
    transport: TransportSession<B>,
    peer: Option<String>,
    log: Vec<ChatEntry>,
    appended: broadcast::Sender<ChatEntry>,
    errors: ErrorReporter,
}

impl<B: PeerBroker> ChatChannel<B> {
    pub fn new(transport: TransportSession<B>, errors: ErrorReporter, capacity: usize) -> Self {
        Self {
            transport,
            peer: None,
            log: Vec::new(),
            appended: broadcast::channel(capacity.max(1)).0,
            errors,
        }
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn messages(&self) -> &[ChatEntry] {
        &self.log
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEntry> {
        self.appended.subscribe()
    }

    /// Open (or reuse) a data session to `peer_id` and make it the chat peer.
    pub async fn connect(&mut self, peer_id: &str) -> Result<SessionId> {
        match self.transport.connect_data(peer_id).await {
            Ok(session) => {
                info!("chat connected to {}", peer_id);
                self.peer = Some(peer_id.to_string());
                Ok(session)
            }
            Err(err) => {
                self.errors.report(&err);
                Err(err)
            }
        }
    }

    /// Send a text message. Whitespace-only text is ignored.
    pub fn send(&mut self, text: impl Into<String>) -> Result<()> {
        let body = text.into();
        if body.trim().is_empty() {
            return Ok(());
        }

        let Some(peer) = self
            .peer
            .clone()
            .filter(|peer| self.transport.data_state(peer).is_some())
        else {
            let err = Error::not_connected("no chat session is open");
            self.errors.report(&err);
            return Err(err);
        };

        let sent_at_millis = now_millis();
        let payload = DataPayload::Text {
            body: body.clone(),
            sent_at_millis,
        };
        if let Err(err) = self.transport.send_data(&peer, payload) {
            warn!("chat send to {} failed: {}", peer, err);
            self.errors.report(&err);
            return Err(err);
        }

        self.append(ChatEntry {
            direction: Direction::Local,
            peer,
            body,
            sent_at_millis,
        });
        Ok(())
    }

    /// An inbound data session. It becomes the chat peer.
    pub fn handle_incoming(&mut self, session: SessionId, peer_id: &str) {
        self.transport.accept_incoming_data(peer_id, session);
        if self.peer.as_deref() != Some(peer_id) {
            info!("chat peer is now {}", peer_id);
        }
        self.peer = Some(peer_id.to_string());
    }

    pub fn handle_payload(&mut self, session: SessionId, payload: DataPayload) {
        let Some(peer) = self.transport.peer_for_data(session) else {
            debug!("payload on unknown data session {}", session);
            return;
        };
        match payload {
            DataPayload::Text {
                body,
                sent_at_millis,
            } => self.append(ChatEntry {
                direction: Direction::Remote,
                peer,
                body,
                sent_at_millis,
            }),
        }
    }

    fn append(&mut self, entry: ChatEntry) {
        self.log.push(entry.clone());
        let _ = self.appended.send(entry);
    }
}
