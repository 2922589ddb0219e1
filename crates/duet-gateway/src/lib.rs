//! Duet presence and signaling gateway.
//!
//! Clients hold one WebSocket control connection each, register the transport
//! identity their P2P library handed them, and receive the full roster every
//! time someone joins or leaves. Offer/answer/candidate envelopes addressed to
//! a registered transport id are forwarded untouched.

pub mod app;
pub mod config;
pub mod presence;
pub mod relay;
pub mod security;
pub mod signal;

pub use app::{router, AppState, RuntimeMetrics};
pub use config::GatewayConfig;
pub use presence::{ConnectionId, PresenceRegistry, Registration, SharedRegistry, Signaler};
