use anyhow::{anyhow, bail, Result};
use duet_common::{ClientMessage, Identity, RelayKind, ServerMessage};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// A frame received on the control connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Server(ServerMessage),
    /// An offer/answer/candidate another client addressed to us, untouched.
    Relay { kind: RelayKind, envelope: Value },
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let relay = value
            .get("type")
            .and_then(Value::as_str)
            .and_then(RelayKind::from_type);
        match relay {
            Some(kind) => Ok(Self::Relay {
                kind,
                envelope: value,
            }),
            None => Ok(Self::Server(serde_json::from_value(value)?)),
        }
    }
}

/// Control connection to the presence gateway.
pub struct SignalingClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    identity: Identity,
}

impl SignalingClient {
    /// Connect and register `identity`. The first roster follows on [`Self::recv`].
    pub async fn connect(url: &str, identity: Identity) -> Result<Self> {
        let (mut ws, _) = connect_async(url).await?;

        let register = ClientMessage::register(&identity);
        ws.send(Message::Text(serde_json::to_string(&register)?.into()))
            .await?;
        info!(
            "registering {} as {} with {}",
            identity.username, identity.transport_id, url
        );

        Ok(Self { ws, identity })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Send an offer/answer/candidate envelope. It must carry `type` and `target`.
    pub async fn send_envelope(&mut self, envelope: Value) -> Result<()> {
        let kind = envelope
            .get("type")
            .and_then(Value::as_str)
            .and_then(RelayKind::from_type)
            .ok_or_else(|| anyhow!("envelope type is not relayable"))?;
        if envelope.get("target").and_then(Value::as_str).is_none() {
            bail!("{} envelope without target", kind.as_str());
        }
        self.ws.send(Message::Text(envelope.to_string().into())).await?;
        Ok(())
    }

    /// Build and send a relay envelope from this client to `target`.
    pub async fn relay(&mut self, kind: RelayKind, target: &str, body: Value) -> Result<()> {
        let mut envelope = match body {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => bail!("relay body must be an object, got {}", other),
        };
        envelope.insert("type".into(), kind.as_str().into());
        envelope.insert("target".into(), target.into());
        envelope.insert("from".into(), self.identity.transport_id.clone().into());
        self.send_envelope(Value::Object(envelope)).await
    }

    pub async fn recv(&mut self) -> Result<Inbound> {
        while let Some(msg) = self.ws.next().await {
            match msg? {
                Message::Text(text) => return Inbound::parse(&text),
                Message::Close(_) => break,
                other => debug!("ignoring control frame {:?}", other),
            }
        }
        Err(anyhow!("signaling connection closed"))
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

/// A roster as this client should present it: everyone except itself.
#[derive(Debug, Clone)]
pub struct RosterView {
    own_transport_id: String,
}

impl RosterView {
    pub fn new(own_transport_id: impl Into<String>) -> Self {
        Self {
            own_transport_id: own_transport_id.into(),
        }
    }

    pub fn peers(&self, users: &[Identity]) -> Vec<Identity> {
        users
            .iter()
            .filter(|user| user.transport_id != self.own_transport_id)
            .cloned()
            .collect()
    }
}
