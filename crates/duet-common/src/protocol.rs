use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A registered presence entry: display name plus the transport address peers dial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(rename = "peerId")]
    pub transport_id: String,
}

impl Identity {
    pub fn new(username: impl Into<String>, transport_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            transport_id: transport_id.into(),
        }
    }
}

/// Messages a client sends to the gateway that the gateway interprets itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Register {
        username: String,
        #[serde(rename = "peerId")]
        peer_id: String,
    },
}

impl ClientMessage {
    pub fn register(identity: &Identity) -> Self {
        Self::Register {
            username: identity.username.clone(),
            peer_id: identity.transport_id.clone(),
        }
    }
}

/// Messages the gateway sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full roster snapshot, in registration order.
    Users { users: Vec<Identity> },
    /// Acknowledges a `register` from this connection.
    Registered {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    Error { message: String },
}

/// Signaling envelope types the gateway forwards without interpreting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

impl RelayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }

    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "ice-candidate" => Some(Self::IceCandidate),
            _ => None,
        }
    }
}

/// Decoded view of an inbound control-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEnvelope {
    Register(Identity),
    /// A relayable envelope addressed to `target` (a transport id). Only the
    /// routing fields are decoded; the frame text itself is forwarded as-is.
    Relay { kind: RelayKind, target: String },
}

impl ControlEnvelope {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| Error::protocol(format!("invalid JSON: {err}")))?;
        let Some(message_type) = value.get("type").and_then(Value::as_str) else {
            return Err(Error::protocol("missing message type"));
        };

        if message_type == "register" {
            let ClientMessage::Register { username, peer_id } =
                serde_json::from_value::<ClientMessage>(value.clone())
                    .map_err(|err| Error::protocol(format!("malformed register payload: {err}")))?;
            return Ok(Self::Register(Identity::new(username, peer_id)));
        }

        let Some(kind) = RelayKind::from_type(message_type) else {
            return Err(Error::protocol(format!(
                "unsupported message type: {message_type}"
            )));
        };
        let Some(target) = value.get("target").and_then(Value::as_str) else {
            return Err(Error::protocol(format!(
                "{} envelope without target",
                kind.as_str()
            )));
        };
        Ok(Self::Relay {
            kind,
            target: target.to_string(),
        })
    }
}

/// Media kind a call is placed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Metadata attached to an outbound media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    pub kind: CallKind,
}

/// Payloads carried over a direct data session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataPayload {
    Text {
        body: String,
        #[serde(rename = "sentAtMillis")]
        sent_at_millis: i64,
    },
}
