//! Port traits for the external collaborators the client depends on.
//!
//! The P2P library and the capture layer are adapters behind these traits;
//! nothing else in the crate knows how sessions are negotiated or how a
//! microphone is opened.

use async_trait::async_trait;
use duet_common::{CallMetadata, DataPayload, Result};

use crate::events::SessionId;
use crate::media::{MediaConstraints, MediaStream, MediaTrack, TrackKind};

// ---------------------------------------------------------------------------
// PeerBroker (P2P transport library)
// ---------------------------------------------------------------------------

/// One endpoint of the P2P transport: identity acquisition, data sessions and
/// media sessions.
///
/// Inbound sessions and session lifecycle changes are not returned from these
/// methods; the adapter delivers them as [`crate::TransportEvent`]s on the
/// channel handed out when the broker was created.
#[async_trait]
pub trait PeerBroker: Send + Sync {
    /// Obtain a transport identity from the broker.
    async fn open(&self) -> Result<String>;

    /// Start a reliable data session to `peer_id`. The session becomes usable
    /// once `DataOpened` is delivered for it.
    async fn connect_data(&self, peer_id: &str) -> Result<SessionId>;

    fn send_data(&self, session: SessionId, payload: &DataPayload) -> Result<()>;

    fn close_data(&self, session: SessionId);

    /// Place a media session to `peer_id` carrying `local` and tagged with `metadata`.
    async fn call(
        &self,
        peer_id: &str,
        local: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<SessionId>;

    /// Answer an inbound media session with `local`.
    async fn answer(&self, session: SessionId, local: &MediaStream) -> Result<()>;

    /// Close a media session. Closing an unknown or closed session is a no-op.
    fn close_media(&self, session: SessionId);

    /// Whether the media session has an established peer connection.
    fn has_live_connection(&self, session: SessionId) -> bool;

    /// Swap `track` onto the outbound sender of the same kind.
    ///
    /// Returns `Ok(false)` when no sender of that kind exists.
    async fn replace_track(&self, session: SessionId, track: &MediaTrack) -> Result<bool>;

    /// Add a new outbound sender for `track`, belonging to `stream`.
    async fn add_track(
        &self,
        session: SessionId,
        track: &MediaTrack,
        stream: &MediaStream,
    ) -> Result<()>;

    /// Detach the track from every outbound sender of `kind`. Senders stay in place.
    async fn remove_track(&self, session: SessionId, kind: TrackKind) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MediaDevices (capture layer)
// ---------------------------------------------------------------------------

/// getUserMedia-equivalent.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Fails with [`duet_common::Error::MediaAccess`] when the device is
    /// missing or access is refused.
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream>;
}
