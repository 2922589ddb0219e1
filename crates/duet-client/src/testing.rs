//! In-memory broker network and capture devices for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use duet_common::{CallMetadata, DataPayload, Error, MediaAccessKind, Result};
use tokio::sync::mpsc;

use crate::events::{SessionId, TransportEvent};
use crate::media::{MediaConstraints, MediaStream, MediaTrack, TrackKind};
use crate::ports::{MediaDevices, PeerBroker};

#[derive(Debug, Clone)]
pub(crate) struct FakeSender {
    pub kind: TrackKind,
    pub track: Option<MediaTrack>,
}

struct DataLink {
    from: String,
    to: String,
}

impl DataLink {
    fn other(&self, me: &str) -> String {
        if self.from == me {
            self.to.clone()
        } else {
            self.from.clone()
        }
    }
}

struct MediaLink {
    caller: String,
    callee: String,
    caller_stream: MediaStream,
    answered: bool,
    closed: bool,
    senders: HashMap<String, Vec<FakeSender>>,
}

impl MediaLink {
    fn other(&self, me: &str) -> String {
        if self.caller == me {
            self.callee.clone()
        } else {
            self.caller.clone()
        }
    }
}

fn senders_for(stream: &MediaStream) -> Vec<FakeSender> {
    stream
        .tracks()
        .iter()
        .map(|track| FakeSender {
            kind: track.kind(),
            track: Some(track.clone()),
        })
        .collect()
}

#[derive(Default)]
struct NetInner {
    next_session: SessionId,
    endpoints: HashMap<String, mpsc::UnboundedSender<TransportEvent>>,
    hold_data_open: bool,
    data: HashMap<SessionId, DataLink>,
    open_data: HashSet<SessionId>,
    closed_data: HashSet<SessionId>,
    data_sessions_opened: usize,
    delivered: Vec<(String, DataPayload)>,
    media: HashMap<SessionId, MediaLink>,
}

impl NetInner {
    fn next_id(&mut self) -> SessionId {
        self.next_session += 1;
        self.next_session
    }

    fn emit(&self, to: &str, event: TransportEvent) {
        if let Some(tx) = self.endpoints.get(to) {
            let _ = tx.send(event);
        }
    }
}

/// A set of endpoints that can reach each other by transport id.
#[derive(Default)]
pub(crate) struct FakeNetwork {
    inner: Mutex<NetInner>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn inner(&self) -> MutexGuard<'_, NetInner> {
        self.inner.lock().unwrap()
    }

    pub fn join(
        self: &Arc<Self>,
        id: &str,
    ) -> (Arc<FakeBroker>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner().endpoints.insert(id.to_string(), tx);
        let broker = Arc::new(FakeBroker {
            id: id.to_string(),
            net: self.clone(),
            fail_open: AtomicBool::new(false),
            stall_connect: AtomicBool::new(false),
            fail_add_track: AtomicBool::new(false),
            send_countdown: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
        });
        (broker, rx)
    }

    /// Keep new data sessions in the opening state until [`Self::open_data`].
    pub fn hold_data_open(&self, hold: bool) {
        self.inner().hold_data_open = hold;
    }

    pub fn open_data(&self, session: SessionId) {
        let mut inner = self.inner();
        let Some(link) = inner.data.get(&session) else {
            return;
        };
        let (from, to) = (link.from.clone(), link.to.clone());
        inner.open_data.insert(session);
        inner.emit(&from, TransportEvent::DataOpened { session });
        inner.emit(&to, TransportEvent::DataOpened { session });
    }

    pub fn delivered_to(&self, peer: &str) -> Vec<DataPayload> {
        self.inner()
            .delivered
            .iter()
            .filter(|(to, _)| to == peer)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn data_closed(&self, session: SessionId) -> bool {
        self.inner().closed_data.contains(&session)
    }

    pub fn data_sessions_opened(&self) -> usize {
        self.inner().data_sessions_opened
    }

    pub fn senders(&self, session: SessionId, owner: &str) -> Vec<FakeSender> {
        self.inner()
            .media
            .get(&session)
            .and_then(|link| link.senders.get(owner).cloned())
            .unwrap_or_default()
    }

    pub fn media_closed(&self, session: SessionId) -> bool {
        self.inner()
            .media
            .get(&session)
            .map_or(true, |link| link.closed)
    }

    /// Callee refuses without ever answering.
    pub fn reject_media(&self, session: SessionId) {
        let mut inner = self.inner();
        let Some(link) = inner.media.get_mut(&session) else {
            return;
        };
        link.closed = true;
        let caller = link.caller.clone();
        inner.emit(&caller, TransportEvent::MediaRejected { session });
    }

    pub fn fail_media(&self, session: SessionId, message: &str) {
        let mut inner = self.inner();
        let Some(link) = inner.media.get_mut(&session) else {
            return;
        };
        link.closed = true;
        let (caller, callee) = (link.caller.clone(), link.callee.clone());
        for to in [caller, callee] {
            inner.emit(
                &to,
                TransportEvent::MediaError {
                    session,
                    message: message.to_string(),
                },
            );
        }
    }
}

pub(crate) struct FakeBroker {
    id: String,
    net: Arc<FakeNetwork>,
    fail_open: AtomicBool,
    stall_connect: AtomicBool,
    fail_add_track: AtomicBool,
    /// Counts down on each `send_data`; the send that reaches zero fails.
    send_countdown: AtomicUsize,
    open_calls: AtomicUsize,
}

impl FakeBroker {
    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn stall_connect(&self) {
        self.stall_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_add_track(&self) {
        self.fail_add_track.store(true, Ordering::SeqCst);
    }

    /// Fail the `nth` data send from now (1-based), once.
    pub fn fail_send_at(&self, nth: usize) {
        self.send_countdown.store(nth, Ordering::SeqCst);
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerBroker for FakeBroker {
    async fn open(&self) -> Result<String> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::transport_init("broker unreachable"));
        }
        Ok(self.id.clone())
    }

    async fn connect_data(&self, peer_id: &str) -> Result<SessionId> {
        if self.stall_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut inner = self.net.inner();
        if !inner.endpoints.contains_key(peer_id) {
            return Err(Error::connection(format!("peer {} unavailable", peer_id)));
        }
        let session = inner.next_id();
        inner.data.insert(
            session,
            DataLink {
                from: self.id.clone(),
                to: peer_id.to_string(),
            },
        );
        inner.data_sessions_opened += 1;
        inner.emit(
            peer_id,
            TransportEvent::IncomingData {
                session,
                peer: self.id.clone(),
            },
        );
        if !inner.hold_data_open {
            inner.open_data.insert(session);
            inner.emit(&self.id, TransportEvent::DataOpened { session });
            inner.emit(peer_id, TransportEvent::DataOpened { session });
        }
        Ok(session)
    }

    fn send_data(&self, session: SessionId, payload: &DataPayload) -> Result<()> {
        let countdown = self
            .send_countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if countdown == Ok(1) {
            return Err(Error::connection("data channel send failed"));
        }
        let mut inner = self.net.inner();
        let Some(link) = inner.data.get(&session) else {
            return Err(Error::not_connected("data session closed"));
        };
        if !inner.open_data.contains(&session) {
            return Err(Error::not_connected("data session not open"));
        }
        let to = link.other(&self.id);
        inner.delivered.push((to.clone(), payload.clone()));
        inner.emit(
            &to,
            TransportEvent::DataReceived {
                session,
                payload: payload.clone(),
            },
        );
        Ok(())
    }

    fn close_data(&self, session: SessionId) {
        let mut inner = self.net.inner();
        if let Some(link) = inner.data.remove(&session) {
            inner.open_data.remove(&session);
            inner.closed_data.insert(session);
            inner.emit(&link.other(&self.id), TransportEvent::DataClosed { session });
        }
    }

    async fn call(
        &self,
        peer_id: &str,
        local: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<SessionId> {
        let mut inner = self.net.inner();
        if !inner.endpoints.contains_key(peer_id) {
            return Err(Error::connection(format!("peer {} unavailable", peer_id)));
        }
        let session = inner.next_id();
        let mut senders = HashMap::new();
        senders.insert(self.id.clone(), senders_for(local));
        inner.media.insert(
            session,
            MediaLink {
                caller: self.id.clone(),
                callee: peer_id.to_string(),
                caller_stream: local.clone(),
                answered: false,
                closed: false,
                senders,
            },
        );
        inner.emit(
            peer_id,
            TransportEvent::IncomingMedia {
                session,
                peer: self.id.clone(),
                metadata: Some(metadata),
            },
        );
        Ok(session)
    }

    async fn answer(&self, session: SessionId, local: &MediaStream) -> Result<()> {
        let mut inner = self.net.inner();
        let Some(link) = inner.media.get_mut(&session) else {
            return Err(Error::connection("unknown media session"));
        };
        if link.closed {
            return Err(Error::connection("media session already closed"));
        }
        link.answered = true;
        link.senders.insert(self.id.clone(), senders_for(local));
        let caller = link.caller.clone();
        let caller_stream = link.caller_stream.clone();
        inner.emit(
            &caller,
            TransportEvent::RemoteStream {
                session,
                stream: local.clone(),
            },
        );
        inner.emit(
            &self.id,
            TransportEvent::RemoteStream {
                session,
                stream: caller_stream,
            },
        );
        Ok(())
    }

    fn close_media(&self, session: SessionId) {
        let mut inner = self.net.inner();
        let Some(link) = inner.media.get_mut(&session) else {
            return;
        };
        if link.closed {
            return;
        }
        link.closed = true;
        let other = link.other(&self.id);
        inner.emit(&other, TransportEvent::MediaClosed { session });
    }

    fn has_live_connection(&self, session: SessionId) -> bool {
        self.net
            .inner()
            .media
            .get(&session)
            .map_or(false, |link| link.answered && !link.closed)
    }

    async fn replace_track(&self, session: SessionId, track: &MediaTrack) -> Result<bool> {
        let mut inner = self.net.inner();
        let senders = inner
            .media
            .get_mut(&session)
            .and_then(|link| link.senders.get_mut(&self.id))
            .ok_or_else(|| Error::connection("unknown media session"))?;
        match senders.iter_mut().find(|sender| sender.kind == track.kind()) {
            Some(sender) => {
                sender.track = Some(track.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_track(
        &self,
        session: SessionId,
        track: &MediaTrack,
        _stream: &MediaStream,
    ) -> Result<()> {
        if self.fail_add_track.load(Ordering::SeqCst) {
            return Err(Error::connection("renegotiation failed"));
        }
        let mut inner = self.net.inner();
        let senders = inner
            .media
            .get_mut(&session)
            .and_then(|link| link.senders.get_mut(&self.id))
            .ok_or_else(|| Error::connection("unknown media session"))?;
        senders.push(FakeSender {
            kind: track.kind(),
            track: Some(track.clone()),
        });
        Ok(())
    }

    async fn remove_track(&self, session: SessionId, kind: TrackKind) -> Result<()> {
        let mut inner = self.net.inner();
        if let Some(senders) = inner
            .media
            .get_mut(&session)
            .and_then(|link| link.senders.get_mut(&self.id))
        {
            for sender in senders.iter_mut().filter(|sender| sender.kind == kind) {
                sender.track = None;
            }
        }
        Ok(())
    }
}

/// Capture layer that hands out fresh tracks and records every request.
#[derive(Default)]
pub(crate) struct FakeDevices {
    deny_all: Mutex<Option<MediaAccessKind>>,
    deny_video: AtomicBool,
    requests: Mutex<Vec<MediaConstraints>>,
    issued: Mutex<Vec<MediaTrack>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, kind: MediaAccessKind) {
        *self.deny_all.lock().unwrap() = Some(kind);
    }

    pub fn deny_video(&self) {
        self.deny_video.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.requests.lock().unwrap().clone()
    }

    pub fn issued(&self) -> Vec<MediaTrack> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        self.requests.lock().unwrap().push(constraints);
        if let Some(kind) = *self.deny_all.lock().unwrap() {
            return Err(Error::media_access(kind, "capture refused"));
        }
        if constraints.video && self.deny_video.load(Ordering::SeqCst) {
            return Err(Error::media_access(
                MediaAccessKind::DeviceNotFound,
                "no camera",
            ));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "fake microphone"));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, "fake camera"));
        }
        self.issued.lock().unwrap().extend(tracks.iter().cloned());
        Ok(MediaStream::new(tracks))
    }
}

/// Everything currently queued on a receiver.
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
