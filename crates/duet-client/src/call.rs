//! Call orchestrator.
//!
//! Owns the single call session of this client and drives it through
//! `Idle -> OutgoingRinging | IncomingPending -> Active <-> Upgrading -> Ended -> Idle`.
//! Commands take `&mut self`, so two negotiations can never interleave;
//! transport events that arrive while a command is suspended are handled
//! afterwards through [`CallOrchestrator::handle_event`].
//!
//! Every exit from a call goes through `release`, which is the only place
//! local tracks are stopped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use duet_common::{CallKind, CallMetadata, Error, MediaAccessKind, Result};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::events::{
    CallEvent, CallState, EndReason, ErrorEvent, ErrorReporter, IncomingCall, SessionId,
    TransportEvent,
};
use crate::media::{MediaConstraints, MediaStream, TrackKind};
use crate::ports::{MediaDevices, PeerBroker};
use crate::transport::TransportSession;

#[derive(Debug)]
struct CallSession {
    state: CallState,
    kind: CallKind,
    peer: String,
    /// `None` only while an outbound session is being placed.
    media: Option<SessionId>,
    local: Option<MediaStream>,
    remote: Option<MediaStream>,
    connected_at: Option<Instant>,
}

impl CallSession {
    fn outgoing(peer: &str, kind: CallKind) -> Self {
        Self {
            state: CallState::OutgoingRinging,
            kind,
            peer: peer.to_string(),
            media: None,
            local: None,
            remote: None,
            connected_at: None,
        }
    }

    fn incoming(peer: &str, kind: CallKind, media: SessionId) -> Self {
        Self {
            state: CallState::IncomingPending,
            kind,
            peer: peer.to_string(),
            media: Some(media),
            local: None,
            remote: None,
            connected_at: None,
        }
    }
}

struct Observers {
    state: watch::Sender<CallState>,
    local: watch::Sender<Option<MediaStream>>,
    remote: watch::Sender<Option<MediaStream>>,
    incoming: watch::Sender<Option<IncomingCall>>,
    events: broadcast::Sender<CallEvent>,
}

impl Observers {
    fn new(capacity: usize) -> Self {
        Self {
            state: watch::channel(CallState::Idle).0,
            local: watch::channel(None).0,
            remote: watch::channel(None).0,
            incoming: watch::channel(None).0,
            events: broadcast::channel(capacity.max(1)).0,
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: CallState) {
        if self.state.send_replace(state) != state {
            self.emit(CallEvent::StateChanged(state));
        }
    }
}

pub struct CallOrchestrator<B, M> {
    transport: TransportSession<B>,
    devices: Arc<M>,
    session: Option<CallSession>,
    observers: Observers,
    errors: ErrorReporter,
}

impl<B: PeerBroker, M: MediaDevices> CallOrchestrator<B, M> {
    pub fn new(
        transport: TransportSession<B>,
        devices: Arc<M>,
        errors: ErrorReporter,
        event_capacity: usize,
    ) -> Self {
        Self {
            transport,
            devices,
            session: None,
            observers: Observers::new(event_capacity),
            errors,
        }
    }

    // -- Queries --

    pub fn state(&self) -> CallState {
        self.session
            .as_ref()
            .map_or(CallState::Idle, |session| session.state)
    }

    pub fn kind(&self) -> Option<CallKind> {
        self.session.as_ref().map(|session| session.kind)
    }

    pub fn peer(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.peer.as_str())
    }

    pub fn media_session(&self) -> Option<SessionId> {
        self.session.as_ref().and_then(|session| session.media)
    }

    pub fn in_call(&self) -> bool {
        self.state().is_connected()
    }

    /// Time since the call became active.
    pub fn call_duration(&self) -> Option<Duration> {
        self.session
            .as_ref()
            .and_then(|session| session.connected_at)
            .map(|at| at.elapsed())
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.session.as_ref().and_then(|session| session.local.as_ref())
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.session.as_ref().and_then(|session| session.remote.as_ref())
    }

    pub fn pending_call(&self) -> Option<IncomingCall> {
        self.session
            .as_ref()
            .filter(|session| session.state == CallState::IncomingPending)
            .map(|session| IncomingCall {
                peer: session.peer.clone(),
                kind: session.kind,
            })
    }

    // -- Observers --

    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.observers.state.subscribe()
    }

    pub fn watch_local(&self) -> watch::Receiver<Option<MediaStream>> {
        self.observers.local.subscribe()
    }

    pub fn watch_remote(&self) -> watch::Receiver<Option<MediaStream>> {
        self.observers.remote.subscribe()
    }

    pub fn watch_incoming(&self) -> watch::Receiver<Option<IncomingCall>> {
        self.observers.incoming.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.observers.events.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    // -- Commands --

    /// Acquire local media for `kind` and place a media session to `peer_id`.
    pub async fn start_call(&mut self, peer_id: &str, kind: CallKind) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::invalid_state("call already in progress"));
        }

        info!("calling {} ({})", peer_id, kind);
        self.session = Some(CallSession::outgoing(peer_id, kind));
        self.observers.set_state(CallState::OutgoingRinging);

        if let Err(err) = self.place_call(peer_id, kind).await {
            warn!("call to {} failed: {}", peer_id, err);
            self.errors.report(&err);
            self.release(EndReason::Failed);
            return Err(err);
        }
        Ok(())
    }

    async fn place_call(&mut self, peer_id: &str, kind: CallKind) -> Result<()> {
        let local = self
            .devices
            .get_user_media(MediaConstraints::for_call(kind))
            .await?;
        self.adopt_local(local.clone());

        let media = self
            .transport
            .call(peer_id, &local, CallMetadata { kind })
            .await?;
        if let Some(session) = self.session.as_mut() {
            session.media = Some(media);
        }
        Ok(())
    }

    /// Answer the pending inbound call with media of the offered kind.
    pub async fn accept_call(&mut self) -> Result<()> {
        let (media, kind, peer) = match &self.session {
            Some(CallSession {
                state: CallState::IncomingPending,
                media: Some(media),
                kind,
                peer,
                ..
            }) => (*media, *kind, peer.clone()),
            _ => return Err(Error::invalid_state("no pending call")),
        };

        info!("accepting {} call from {}", kind, peer);
        if let Err(err) = self.answer_pending(media, kind).await {
            warn!("accepting call from {} failed: {}", peer, err);
            self.errors.report(&err);
            self.release(EndReason::Failed);
            return Err(err);
        }

        if let Some(session) = self.session.as_mut() {
            session.connected_at = Some(Instant::now());
        }
        self.observers.incoming.send_replace(None);
        self.enter(CallState::Active);
        self.observers.emit(CallEvent::Connected { peer, kind });
        Ok(())
    }

    async fn answer_pending(&mut self, media: SessionId, kind: CallKind) -> Result<()> {
        let local = self
            .devices
            .get_user_media(MediaConstraints::for_call(kind))
            .await?;
        self.adopt_local(local.clone());
        self.transport.answer(media, &local).await
    }

    /// Decline the pending inbound call. No media is ever acquired.
    pub fn reject_call(&mut self) {
        if self.state() != CallState::IncomingPending {
            debug!("reject with no pending call");
            return;
        }
        if let Some(peer) = self.peer() {
            info!("rejecting call from {}", peer);
        }
        self.release(EndReason::Rejected);
    }

    /// Hang up. A no-op when there is no call.
    pub fn end_call(&mut self) {
        if self.session.is_none() {
            debug!("end with no call");
            return;
        }
        self.release(EndReason::Local);
    }

    /// Add a camera track to an active audio call.
    ///
    /// On failure the new track is stopped, the audio-only composition is
    /// restored and the call stays active.
    pub async fn upgrade_to_video(&mut self) -> Result<()> {
        let (kind, media) = self.active()?;
        if kind == CallKind::Video {
            return Err(Error::invalid_state("already video"));
        }
        let media = media
            .filter(|media| self.transport.has_live_connection(*media))
            .ok_or_else(|| Error::connection("call has no live connection"))?;

        self.enter(CallState::Upgrading);
        match self.splice_video(media).await {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.kind = CallKind::Video;
                }
                self.enter(CallState::Active);
                self.observers.emit(CallEvent::KindChanged(CallKind::Video));
                info!("upgraded call to video");
                Ok(())
            }
            Err(err) => {
                warn!("upgrade to video failed: {}", err);
                self.errors.report(&err);
                self.enter(CallState::Active);
                Err(err)
            }
        }
    }

    async fn splice_video(&mut self, media: SessionId) -> Result<()> {
        let captured = self
            .devices
            .get_user_media(MediaConstraints::video_only())
            .await?;
        let Some(track) = captured.video_tracks().next().cloned() else {
            captured.stop_all();
            return Err(Error::media_access(
                MediaAccessKind::DeviceNotFound,
                "capture returned no video track",
            ));
        };
        for extra in captured.tracks().iter().filter(|other| **other != track) {
            extra.stop();
        }

        let local = match self.session.as_mut().and_then(|s| s.local.as_mut()) {
            Some(local) => {
                local.add_track(track.clone());
                local.clone()
            }
            None => {
                track.stop();
                return Err(Error::invalid_state("no local media"));
            }
        };
        self.observers.local.send_replace(Some(local.clone()));

        // Reuse an idle video sender when there is one, otherwise add a sender.
        let attached = match self.transport.replace_track(media, &track).await {
            Ok(true) => Ok(()),
            Ok(false) => self.transport.add_track(media, &track, &local).await,
            Err(err) => {
                debug!("replace_track failed ({}), adding a sender", err);
                self.transport.add_track(media, &track, &local).await
            }
        };

        if let Err(err) = attached {
            track.stop();
            if let Some(local) = self.session.as_mut().and_then(|s| s.local.as_mut()) {
                local.remove_track(track.id());
                self.observers.local.send_replace(Some(local.clone()));
            }
            return Err(err);
        }
        Ok(())
    }

    /// Drop the camera from an active video call and keep talking.
    pub async fn downgrade_to_audio(&mut self) -> Result<()> {
        let (kind, media) = self.active()?;
        if kind == CallKind::Audio {
            return Err(Error::invalid_state("already audio"));
        }

        if let Some(local) = self.session.as_mut().and_then(|s| s.local.as_mut()) {
            for track in local.remove_kind(TrackKind::Video) {
                track.stop();
            }
            self.observers.local.send_replace(Some(local.clone()));
        }
        if let Some(media) = media {
            if let Err(err) = self.transport.remove_track(media, TrackKind::Video).await {
                warn!("detaching video sender failed: {}", err);
                self.errors.report(&err);
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.kind = CallKind::Audio;
        }
        self.observers.emit(CallEvent::KindChanged(CallKind::Audio));
        info!("downgraded call to audio");
        Ok(())
    }

    /// Mute or unmute. Returns the new enabled state.
    pub fn toggle_microphone(&mut self) -> Result<bool> {
        self.toggle(TrackKind::Audio)
    }

    /// Blank or unblank the camera. Returns the new enabled state.
    pub fn toggle_camera(&mut self) -> Result<bool> {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&self, kind: TrackKind) -> Result<bool> {
        let local = self.local_stream();
        let tracks: Vec<_> = local
            .map(|local| local.tracks_of(kind).collect())
            .unwrap_or_default();
        let Some(first) = tracks.first() else {
            return Err(Error::invalid_state(format!("no local {} track", kind)));
        };

        let enabled = !first.is_enabled();
        for track in &tracks {
            track.set_enabled(enabled);
        }
        debug!("{} enabled: {}", kind, enabled);
        self.observers.local.send_replace(local.cloned());
        Ok(enabled)
    }

    // -- Transport events --

    /// Apply a media event from the transport. Data events are ignored.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IncomingMedia {
                session,
                peer,
                metadata,
            } => self.on_incoming(session, &peer, metadata),
            TransportEvent::RemoteStream { session, stream } => {
                if self.is_current(session) {
                    self.on_remote_stream(stream);
                }
            }
            TransportEvent::MediaRejected { session } => {
                if self.is_current(session) {
                    let reason = match self.state() {
                        CallState::OutgoingRinging => EndReason::Declined,
                        _ => EndReason::Remote,
                    };
                    self.release(reason);
                }
            }
            TransportEvent::MediaClosed { session } => {
                if self.is_current(session) {
                    // No stream before the close means the callee never picked up.
                    let reason = match self.state() {
                        CallState::OutgoingRinging => EndReason::Declined,
                        _ => EndReason::Remote,
                    };
                    self.release(reason);
                }
            }
            TransportEvent::MediaError { session, message } => {
                if self.is_current(session) {
                    let err = Error::connection(message);
                    warn!("media session {} failed: {}", session, err);
                    self.errors.report(&err);
                    self.release(EndReason::Failed);
                }
            }
            other => debug!("call orchestrator ignoring {:?}", other),
        }
    }

    fn on_incoming(&mut self, media: SessionId, peer: &str, metadata: Option<CallMetadata>) {
        let kind = metadata.map_or(CallKind::Audio, |metadata| metadata.kind);
        if self.session.is_some() {
            warn!("busy, closing {} call {} from {}", kind, media, peer);
            self.transport.close_media(media);
            self.errors.report(&Error::busy(format!(
                "rejected {} call from {} while in another call",
                kind, peer
            )));
            return;
        }

        info!("incoming {} call from {}", kind, peer);
        self.session = Some(CallSession::incoming(peer, kind, media));
        let incoming = IncomingCall {
            peer: peer.to_string(),
            kind,
        };
        self.observers.incoming.send_replace(Some(incoming.clone()));
        self.observers.set_state(CallState::IncomingPending);
        self.observers.emit(CallEvent::IncomingCall(incoming));
    }

    fn on_remote_stream(&mut self, stream: MediaStream) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.remote = Some(stream.clone());
        self.observers.remote.send_replace(Some(stream));

        if session.state == CallState::OutgoingRinging {
            session.connected_at = Some(Instant::now());
            let (peer, kind) = (session.peer.clone(), session.kind);
            info!("call with {} connected", peer);
            self.enter(CallState::Active);
            self.observers.emit(CallEvent::Connected { peer, kind });
        }
    }

    // -- Internals --

    fn is_current(&self, media: SessionId) -> bool {
        let current = self.media_session() == Some(media);
        if !current {
            debug!("ignoring event for stale media session {}", media);
        }
        current
    }

    fn active(&self) -> Result<(CallKind, Option<SessionId>)> {
        match &self.session {
            Some(session) if session.state == CallState::Active => {
                Ok((session.kind, session.media))
            }
            _ => Err(Error::invalid_state("no active call")),
        }
    }

    fn adopt_local(&mut self, local: MediaStream) {
        if let Some(session) = self.session.as_mut() {
            session.local = Some(local.clone());
        }
        self.observers.local.send_replace(Some(local));
    }

    fn enter(&mut self, state: CallState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
        self.observers.set_state(state);
    }

    fn release(&mut self, reason: EndReason) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Some(local) = &session.local {
            local.stop_all();
        }
        if let Some(media) = session.media {
            self.transport.close_media(media);
        }
        let duration = session.connected_at.map(|at| at.elapsed());

        self.observers.local.send_replace(None);
        self.observers.remote.send_replace(None);
        self.observers.incoming.send_replace(None);
        if reason != EndReason::Rejected {
            self.observers.set_state(CallState::Ended);
        }
        info!("call with {} ended ({:?})", session.peer, reason);
        self.observers.emit(CallEvent::Ended {
            peer: session.peer,
            reason,
            duration,
        });
        self.observers.set_state(CallState::Idle);
    }
}
