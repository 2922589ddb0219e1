//! Common error types for Duet.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using Duet's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why local media could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaAccessKind {
    /// The user (or platform policy) refused camera/microphone access.
    PermissionDenied,
    /// No capture device of the requested kind exists.
    DeviceNotFound,
    /// Anything else the capture layer reports.
    Other,
}

impl std::fmt::Display for MediaAccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::DeviceNotFound => write!(f, "device not found"),
            Self::Other => write!(f, "capture failed"),
        }
    }
}

/// Top-level error type for Duet operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport library could not obtain a local identity from its broker.
    #[error("transport init error: {0}")]
    TransportInit(String),

    /// Peer unreachable, timed out, or rejected the session.
    #[error("connection error: {0}")]
    Connection(String),

    /// Local media capture failed.
    #[error("media access error ({kind}): {message}")]
    MediaAccess {
        kind: MediaAccessKind,
        message: String,
    },

    /// An inbound call arrived while another call was pending or active.
    #[error("busy: {0}")]
    Busy(String),

    /// Malformed or unexpected control message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport id is already bound to another live control connection.
    #[error("transport id already registered: {0}")]
    DuplicateTransportId(String),

    /// A command was issued in a state where it does not apply.
    #[error("{0}")]
    InvalidState(String),

    /// No data session is open.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transport_init(msg: impl std::fmt::Display) -> Self {
        Self::TransportInit(msg.to_string())
    }

    pub fn connection(msg: impl std::fmt::Display) -> Self {
        Self::Connection(msg.to_string())
    }

    pub fn media_access(kind: MediaAccessKind, msg: impl std::fmt::Display) -> Self {
        Self::MediaAccess {
            kind,
            message: msg.to_string(),
        }
    }

    pub fn busy(msg: impl std::fmt::Display) -> Self {
        Self::Busy(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    pub fn invalid_state(msg: impl std::fmt::Display) -> Self {
        Self::InvalidState(msg.to_string())
    }

    pub fn not_connected(msg: impl std::fmt::Display) -> Self {
        Self::NotConnected(msg.to_string())
    }

    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Coarse classification used on error streams.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransportInit(_) => ErrorKind::TransportInit,
            Self::Connection(_) => ErrorKind::Connection,
            Self::MediaAccess { kind, .. } => ErrorKind::MediaAccess(*kind),
            Self::Busy(_) => ErrorKind::Busy,
            Self::Protocol(_) | Self::DuplicateTransportId(_) | Self::Serialization(_) => {
                ErrorKind::Protocol
            }
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::NotConnected(_) => ErrorKind::NotConnected,
            Self::Io(_) => ErrorKind::Connection,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error classification without the payload, suitable for UI dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum ErrorKind {
    TransportInit,
    Connection,
    MediaAccess(MediaAccessKind),
    Busy,
    Protocol,
    InvalidState,
    NotConnected,
}
