//! Event types flowing into and out of the client.

use std::time::Duration;

use duet_common::{CallKind, CallMetadata, DataPayload, Error, ErrorKind};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::media::MediaStream;

/// Broker-assigned handle for a data or media session.
pub type SessionId = u64;

/// Everything the transport reports asynchronously, as one tagged stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A peer opened a data session to us.
    IncomingData { session: SessionId, peer: String },
    DataOpened { session: SessionId },
    DataReceived {
        session: SessionId,
        payload: DataPayload,
    },
    DataClosed { session: SessionId },
    /// A peer placed a media session to us.
    IncomingMedia {
        session: SessionId,
        peer: String,
        metadata: Option<CallMetadata>,
    },
    /// The remote side's stream arrived (or was renegotiated).
    RemoteStream {
        session: SessionId,
        stream: MediaStream,
    },
    /// The callee refused the session before any stream flowed.
    MediaRejected { session: SessionId },
    MediaClosed { session: SessionId },
    MediaError { session: SessionId, message: String },
    /// Broker-level failure not tied to a session.
    BrokerError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Idle,
    OutgoingRinging,
    IncomingPending,
    Active,
    Upgrading,
    Ended,
}

impl CallState {
    /// `Active` or mid-upgrade.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Active | Self::Upgrading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// We hung up.
    Local,
    /// The peer hung up or the session dropped after connecting.
    Remote,
    /// The peer refused our call.
    Declined,
    /// We refused the peer's call.
    Rejected,
    /// Media acquisition, session setup or the session itself failed.
    Failed,
}

/// A call offered to us and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub peer: String,
    pub kind: CallKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StateChanged(CallState),
    IncomingCall(IncomingCall),
    Connected {
        peer: String,
        kind: CallKind,
    },
    KindChanged(CallKind),
    Ended {
        peer: String,
        reason: EndReason,
        /// Time spent `Active`; `None` if the call never connected.
        duration: Option<Duration>,
    },
}

/// Structured error surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorEvent {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Shared sender half of the error stream.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: broadcast::Sender<ErrorEvent>,
}

impl ErrorReporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.tx.subscribe()
    }

    pub fn report(&self, err: &Error) {
        let event = ErrorEvent::from(err);
        if self.tx.send(event).is_err() {
            debug!("no error subscribers: {}", err);
        }
    }
}
