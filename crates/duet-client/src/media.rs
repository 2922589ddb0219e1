//! Local/remote media model.
//!
//! Tracks are shared handles: the orchestrator, the transport and the UI may
//! all hold clones of the same track, and `stop`/`set_enabled` are visible
//! through every clone. Identity is the track id.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use duet_common::CallKind;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

#[derive(Clone)]
pub struct MediaTrack(Arc<TrackInner>);

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind, label)
    }

    pub fn with_id(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self(Arc::new(TrackInner {
            id: id.into(),
            kind,
            label: label.into(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn kind(&self) -> TrackKind {
        self.0.kind
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn is_enabled(&self) -> bool {
        self.0.enabled.load(Ordering::SeqCst)
    }

    /// Mute/unmute. A disabled track keeps its device open.
    pub fn set_enabled(&self, enabled: bool) {
        self.0.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Release the capture device. Returns `false` if the track was already stopped.
    pub fn stop(&self) -> bool {
        !self.0.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.0.stopped.load(Ordering::SeqCst)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// An ordered set of tracks, local or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |track| track.kind() == kind)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks_of(kind).next().is_some()
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        if !self.tracks.contains(&track) {
            self.tracks.push(track);
        }
    }

    pub fn remove_track(&mut self, id: &str) -> Option<MediaTrack> {
        let position = self.tracks.iter().position(|track| track.id() == id)?;
        Some(self.tracks.remove(position))
    }

    /// Detach every track of `kind`, returning them without stopping them.
    pub fn remove_kind(&mut self, kind: TrackKind) -> Vec<MediaTrack> {
        let (removed, kept) = std::mem::take(&mut self.tracks)
            .into_iter()
            .partition(|track| track.kind() == kind);
        self.tracks = kept;
        removed
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// What to ask the capture layer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn for_call(kind: CallKind) -> Self {
        Self {
            audio: true,
            video: kind == CallKind::Video,
        }
    }

    pub fn video_only() -> Self {
        Self {
            audio: false,
            video: true,
        }
    }
}
