pub mod call;
pub mod chat;
pub mod client;
pub mod events;
pub mod media;
pub mod ports;
pub mod signaling;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use call::CallOrchestrator;
pub use chat::{ChatChannel, ChatEntry, Direction};
pub use client::Client;
pub use events::{
    CallEvent, CallState, EndReason, ErrorEvent, ErrorReporter, IncomingCall, SessionId,
    TransportEvent,
};
pub use media::{MediaConstraints, MediaStream, MediaTrack, TrackKind};
pub use ports::{MediaDevices, PeerBroker};
pub use signaling::{Inbound, RosterView, SignalingClient};
pub use transport::{DataState, TransportSession};
pub use types::ClientConfig;
