//! Channel session test harness
//!
//! Provides infrastructure for integration testing of channel sessions with:
//! - An in-memory transport network that pairs offers with answers
//! - Connectivity, creation-gate and failure injection controls
//! - Scripted media sources and a recording media sink
//! - Event wait helpers bounded by a timeout
//!
//! Basic usage pattern:
//!
//! 1. Create a `LocalRelayHub` and a `MockNetwork`
//! 2. Create participants with `TestPeer::new()`
//! 3. Drive channels through each peer's registry
//! 4. Wait for state changes with `wait_for_state()`

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use studiocast_webrtc::media::AudioPacket;
use studiocast_webrtc::signaling::{LocalRelayHub, SignalingRelay};
use studiocast_webrtc::transport::{
    IceCandidate, PeerConnectionState, SdpType, SessionDescription, TransportEvent,
    TransportEventSender,
};
use studiocast_webrtc::{
    ChannelEvent, ChannelId, ChannelRegistry, ChannelState, Error, LocalTrack, MediaSource,
    ParticipantId, PeerTransport, RemoteMediaSink, RemoteTrack, Result, StreamingConfig, TrackKind,
    TransportFactory, VideoFrame,
};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// Default bound for every wait in the harness
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Result type for test harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Session error: {0}")]
    Session(#[from] Error),

    #[error("Event stream closed")]
    EventsClosed,
}

/// Initialize tracing for tests (safe to call more than once)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug,webrtc=warn")
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Mock transport network
// =============================================================================

#[derive(Clone)]
struct Endpoint {
    owner: ParticipantId,
    events: TransportEventSender,
}

struct Link {
    offerer: Endpoint,
    answerer: Endpoint,
}

struct NetworkInner {
    next_id: AtomicU64,
    connectivity: AtomicBool,
    fail_creates: AtomicUsize,
    created: AtomicUsize,
    offer_delay: Mutex<Duration>,
    offer_failure: Mutex<Option<Error>>,
    audio_packets: AtomicUsize,
    video_frames: AtomicUsize,
    gate: watch::Sender<bool>,
    answers: Mutex<HashMap<String, Endpoint>>,
    links: Mutex<Vec<Link>>,
}

impl NetworkInner {
    /// The offerer applied `answer_sdp`; connect both ends if the network allows
    fn complete(&self, offerer: &MockTransport, answer_sdp: &str) {
        if !self.connectivity.load(Ordering::SeqCst) {
            return;
        }
        let Some(answerer) = self.answers.lock().get(answer_sdp).cloned() else {
            return;
        };

        offerer
            .events
            .emit(TransportEvent::StateChanged(PeerConnectionState::Connected));
        answerer
            .events
            .emit(TransportEvent::StateChanged(PeerConnectionState::Connected));

        for track in offerer.tracks.lock().iter() {
            answerer.events.emit(TransportEvent::TrackReceived(RemoteTrack {
                kind: track.kind,
                id: track.id.clone(),
                stream_id: track.stream_id.clone(),
                handle: None,
            }));
        }

        self.links.lock().push(Link {
            offerer: offerer.endpoint(),
            answerer,
        });
    }
}

/// In-memory stand-in for the real-time transport engine
///
/// Offers and answers are opaque tokens. When an offerer applies an answer,
/// both ends report Connected (if connectivity is on) and the answerer
/// receives the offerer's tracks.
#[derive(Clone)]
pub struct MockNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(NetworkInner {
                next_id: AtomicU64::new(1),
                connectivity: AtomicBool::new(true),
                fail_creates: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
                offer_delay: Mutex::new(Duration::ZERO),
                offer_failure: Mutex::new(None),
                audio_packets: AtomicUsize::new(0),
                video_frames: AtomicUsize::new(0),
                gate,
                answers: Mutex::new(HashMap::new()),
                links: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Transport factory for one participant
    pub fn factory(&self, owner: ParticipantId) -> Arc<MockFactory> {
        Arc::new(MockFactory {
            owner,
            network: Arc::clone(&self.inner),
        })
    }

    /// When off, negotiation completes but nothing ever connects
    pub fn set_connectivity(&self, connected: bool) {
        self.inner.connectivity.store(connected, Ordering::SeqCst);
    }

    /// Make the next `count` transport creations fail
    pub fn fail_next_creates(&self, count: usize) {
        self.inner.fail_creates.store(count, Ordering::SeqCst);
    }

    /// Make every offer take `delay` to create
    pub fn set_offer_delay(&self, delay: Duration) {
        *self.inner.offer_delay.lock() = delay;
    }

    /// Make the next offer creation fail with `error`
    pub fn fail_next_offer(&self, error: Error) {
        *self.inner.offer_failure.lock() = Some(error);
    }

    /// Hold transport creation until `open_gate`
    pub fn close_gate(&self) {
        self.inner.gate.send_replace(false);
    }

    /// Release held transport creations
    pub fn open_gate(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Break every connection between `a` and `b`
    pub fn sever(&self, a: ParticipantId, b: ParticipantId) {
        let mut links = self.inner.links.lock();
        links.retain(|link| {
            let between = (link.offerer.owner == a && link.answerer.owner == b)
                || (link.offerer.owner == b && link.answerer.owner == a);
            if between {
                let failed = TransportEvent::StateChanged(PeerConnectionState::Failed);
                link.offerer.events.emit(failed.clone());
                link.answerer.events.emit(failed);
            }
            !between
        });
    }

    /// Transports successfully created so far
    pub fn transports_created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Audio packets accepted by any transport
    pub fn audio_packets_sent(&self) -> usize {
        self.inner.audio_packets.load(Ordering::SeqCst)
    }

    /// Video frames accepted by any transport
    pub fn video_frames_sent(&self) -> usize {
        self.inner.video_frames.load(Ordering::SeqCst)
    }
}

pub struct MockFactory {
    owner: ParticipantId,
    network: Arc<NetworkInner>,
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(&self, events: TransportEventSender) -> Result<Arc<dyn PeerTransport>> {
        let mut gate = self.network.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| Error::Internal("network dropped".to_string()))?;

        let injected = self
            .network
            .fail_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::TransportConnection("injected create failure".to_string()));
        }

        self.network.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransport {
            id: self.network.next_id.fetch_add(1, Ordering::SeqCst),
            owner: self.owner,
            network: Arc::clone(&self.network),
            events,
            remote: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockTransport {
    id: u64,
    owner: ParticipantId,
    network: Arc<NetworkInner>,
    events: TransportEventSender,
    remote: Mutex<Option<SessionDescription>>,
    tracks: Mutex<Vec<LocalTrack>>,
    closed: AtomicBool,
}

impl MockTransport {
    fn endpoint(&self) -> Endpoint {
        Endpoint {
            owner: self.owner,
            events: self.events.clone(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed(format!("transport {} closed", self.id)));
        }
        Ok(())
    }

    fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.lock().iter().any(|t| t.kind == kind)
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let delay = *self.network.offer_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.network.offer_failure.lock().take() {
            return Err(error);
        }
        Ok(SessionDescription::offer(format!("mock-offer-{}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let remote = self
            .remote
            .lock()
            .clone()
            .ok_or_else(|| Error::Negotiation("no remote offer".to_string()))?;
        Ok(SessionDescription::answer(format!(
            "mock-answer-{}-{}",
            self.id, remote.sdp
        )))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        if description.sdp_type == SdpType::Answer {
            self.network
                .answers
                .lock()
                .insert(description.sdp.clone(), self.endpoint());
        }
        self.events.emit(TransportEvent::IceCandidate(IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                self.id,
                40000 + self.id
            ),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        if !description.sdp.starts_with("mock-") {
            return Err(Error::Negotiation("unparseable SDP".to_string()));
        }
        *self.remote.lock() = Some(description.clone());
        if description.sdp_type == SdpType::Answer {
            self.network.complete(self, &description.sdp);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        self.ensure_open()
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.tracks.lock().push(track.clone());
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<()> {
        self.tracks.lock().retain(|t| t.id != track_id);
        Ok(())
    }

    fn send_audio(&self, _packet: &AudioPacket) -> Result<()> {
        self.ensure_open()?;
        if !self.has_track(TrackKind::Audio) {
            return Err(Error::TransportConnection("no audio track".to_string()));
        }
        self.network.audio_packets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send_video(&self, _frame: &VideoFrame) -> Result<()> {
        self.ensure_open()?;
        if !self.has_track(TrackKind::Video) {
            return Err(Error::TransportConnection("no video track".to_string()));
        }
        self.network.video_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Media collaborators
// =============================================================================

/// Scripted capture device
pub struct MockSource {
    available: AtomicBool,
    tracks: Vec<LocalTrack>,
}

impl MockSource {
    /// Stereo audio only
    pub fn audio() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            tracks: vec![LocalTrack::audio("mic", "studio", 2)],
        })
    }

    /// Stereo audio plus video
    pub fn audio_video() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            tracks: vec![
                LocalTrack::audio("mic", "studio", 2),
                LocalTrack::video("camera", "studio"),
            ],
        })
    }

    /// Device present but exposing nothing
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            tracks: Vec::new(),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl MediaSource for MockSource {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn local_tracks(&self) -> Vec<LocalTrack> {
        self.tracks.clone()
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        self.tracks
            .iter()
            .any(|t| t.kind == TrackKind::Video)
            .then(|| VideoFrame {
                data: Bytes::from_static(&[0x90, 0x01, 0x02, 0x03]),
                duration: Duration::from_millis(33),
            })
    }
}

/// Remembers every remote track handed to it
#[derive(Default)]
pub struct RecordingSink {
    tracks: Mutex<Vec<(ChannelId, Option<ParticipantId>, TrackKind)>>,
}

impl RecordingSink {
    pub fn received(&self) -> Vec<(ChannelId, Option<ParticipantId>, TrackKind)> {
        self.tracks.lock().clone()
    }
}

impl RemoteMediaSink for RecordingSink {
    fn on_track(
        &self,
        channel: &ChannelId,
        participant: Option<ParticipantId>,
        track: RemoteTrack,
    ) {
        self.tracks.lock().push((channel.clone(), participant, track.kind));
    }
}

// =============================================================================
// Participants
// =============================================================================

/// One relay-connected participant with its registry and event stream
pub struct TestPeer {
    pub id: ParticipantId,
    pub registry: ChannelRegistry,
    pub events: broadcast::Receiver<ChannelEvent>,
    pub sink: Arc<RecordingSink>,
}

impl TestPeer {
    /// Participant on a local relay hub with an optional capture source
    pub fn new(
        hub: &LocalRelayHub,
        network: &MockNetwork,
        id: u64,
        config: StreamingConfig,
        source: Option<Arc<dyn MediaSource>>,
    ) -> HarnessResult<Self> {
        let relay = Arc::new(hub.connect(ParticipantId(id)));
        Self::with_relay(relay, network, config, source)
    }

    /// Participant on any relay; its id is the relay's local participant
    pub fn with_relay(
        relay: Arc<dyn SignalingRelay>,
        network: &MockNetwork,
        config: StreamingConfig,
        source: Option<Arc<dyn MediaSource>>,
    ) -> HarnessResult<Self> {
        let id = relay.local_participant();
        let sink = Arc::new(RecordingSink::default());
        let mut builder = ChannelRegistry::builder()
            .config(config)
            .relay(relay)
            .transport_factory(network.factory(id))
            .media_sink(sink.clone());
        if let Some(source) = source {
            builder = builder.media_source(source);
        }
        let registry = builder.build()?;
        let events = registry.subscribe();

        Ok(Self {
            id,
            registry,
            events,
            sink,
        })
    }

    /// Streaming host with a stereo audio source
    pub fn host(
        hub: &LocalRelayHub,
        network: &MockNetwork,
        id: u64,
        config: StreamingConfig,
    ) -> HarnessResult<Self> {
        Self::new(hub, network, id, config, Some(MockSource::audio()))
    }

    /// Viewer without a capture source
    pub fn viewer(
        hub: &LocalRelayHub,
        network: &MockNetwork,
        id: u64,
        config: StreamingConfig,
    ) -> HarnessResult<Self> {
        Self::new(hub, network, id, config, None)
    }

    /// Wait for the first event matching `predicate`
    pub async fn wait_for_event<F>(
        &mut self,
        what: &str,
        mut predicate: F,
    ) -> HarnessResult<ChannelEvent>
    where
        F: FnMut(&ChannelEvent) -> bool,
    {
        let deadline = Instant::now() + DEFAULT_WAIT;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => return Err(HarnessError::Timeout(format!("{}: {}", self.id, what))),
                Ok(Ok(event)) if predicate(&event) => return Ok(event),
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(HarnessError::EventsClosed)
                }
            }
        }
    }

    /// Wait until `channel` enters `state`
    pub async fn wait_for_state(
        &mut self,
        channel: &str,
        state: ChannelState,
    ) -> HarnessResult<()> {
        let channel = ChannelId::new(channel);
        self.wait_for_event(&format!("{} -> {:?}", channel, state), |event| {
            matches!(
                event,
                ChannelEvent::StateChanged { channel: c, current, .. }
                    if *c == channel && *current == state
            )
        })
        .await
        .map(|_| ())
    }

    /// Events already queued, without waiting
    pub fn drain_events(&mut self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Current state of `channel`
    pub async fn state(&self, channel: &str) -> HarnessResult<ChannelState> {
        Ok(self.registry.state(&ChannelId::new(channel)).await?)
    }
}

/// Poll `condition` until it holds or the default wait elapses
pub async fn wait_until<F>(what: &str, mut condition: F) -> HarnessResult<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + DEFAULT_WAIT;
    while !condition() {
        if Instant::now() >= deadline {
            return Err(HarnessError::Timeout(what.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// One packet of stereo audio at 48kHz/20ms
pub fn stereo_packet() -> Vec<f32> {
    vec![0.25; 1920]
}
