//! Session connection: one transport-engine connection and its negotiation
//!
//! Each connection runs its own worker task. Operations are queued and
//! executed in order; results and engine callbacks travel upward as
//! [`ConnectionNotice`]s on a single ordered channel, so a created offer or
//! answer is always reported before the local ICE candidates it produced.
//!
//! The worker owns the per-connection buffering: an offer that arrives while
//! the engine connection is still being created is parked in `pending_offer`,
//! and remote ICE candidates wait in `pending_ice` until a remote description
//! has been applied.

use crate::media::{AudioPacket, LocalTrack, RemoteTrack, VideoFrame};
use crate::transport::{
    IceCandidate, PeerConnectionState, PeerTransport, SessionDescription, TransportEvent,
    TransportEventSender, TransportFactory,
};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

/// Identity of one connection instance
///
/// A retry always builds a new connection with a new id, so results tagged
/// with an old id are recognisably stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mint a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Upward notifications from a connection worker
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Local offer created and applied; relay it
    OfferReady(SessionDescription),
    /// Remote offer applied and local answer created; relay it
    AnswerReady(SessionDescription),
    /// Remote answer applied
    AnswerApplied,
    /// Offer/answer/description step failed
    NegotiationFailed(Error),
    /// Engine gathered a local ICE candidate; relay it
    LocalIceCandidate(IceCandidate),
    /// Remote media arrived
    TrackReceived(RemoteTrack),
    /// Engine reports Connected
    Established,
    /// Engine reports Failed/Disconnected, or could not be created
    Failed(Error),
}

/// A [`ConnectionEvent`] tagged with the connection that produced it
#[derive(Debug)]
pub struct ConnectionNotice {
    /// Producing connection
    pub connection: ConnectionId,
    /// What happened
    pub event: ConnectionEvent,
}

#[derive(Debug)]
enum Op {
    CreateOffer,
    AcceptOffer(String),
    AcceptAnswer(String),
    AddIceCandidate(IceCandidate),
}

/// Handle to one negotiating or established transport connection
///
/// Never reused across sessions. Dropping the handle disposes it.
pub struct SessionConnection {
    id: ConnectionId,
    ops: mpsc::UnboundedSender<Op>,
    cancel: CancellationToken,
    transport: Arc<OnceLock<Arc<dyn PeerTransport>>>,
}

impl SessionConnection {
    /// Start a connection worker
    ///
    /// # Arguments
    ///
    /// * `factory` - Creates the engine connection
    /// * `local_tracks` - Tracks attached before any negotiation
    /// * `notices` - Where results and engine callbacks are reported
    pub fn spawn(
        factory: Arc<dyn TransportFactory>,
        local_tracks: Vec<LocalTrack>,
        notices: mpsc::UnboundedSender<ConnectionNotice>,
    ) -> Self {
        let id = ConnectionId::new();
        let (ops, ops_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let transport = Arc::new(OnceLock::new());

        let worker = Worker {
            id,
            notices,
            cancel: cancel.clone(),
            slot: Arc::clone(&transport),
            remote_description_set: false,
            pending_ice: Vec::new(),
            pending_offer: None,
            deferred: VecDeque::new(),
            established_reported: false,
            failure_reported: false,
        };
        tokio::spawn(worker.run(factory, local_tracks, ops_rx));

        debug!("Connection {} spawned", id);
        Self {
            id,
            ops,
            cancel,
            transport,
        }
    }

    /// Instance identity
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Create a local offer and apply it; reported as `OfferReady`
    pub fn create_offer(&self) {
        self.enqueue(Op::CreateOffer);
    }

    /// Apply a remote offer and answer it; reported as `AnswerReady`
    pub fn accept_offer(&self, sdp: String) {
        self.enqueue(Op::AcceptOffer(sdp));
    }

    /// Apply a remote answer; reported as `AnswerApplied`
    pub fn accept_answer(&self, sdp: String) {
        self.enqueue(Op::AcceptAnswer(sdp));
    }

    /// Apply a remote ICE candidate, or buffer it until a remote description is set
    pub fn add_ice_candidate(&self, candidate: IceCandidate) {
        self.enqueue(Op::AddIceCandidate(candidate));
    }

    /// Send one audio packet if the engine connection exists
    pub fn send_audio(&self, packet: &AudioPacket) -> Result<()> {
        self.engine()?.send_audio(packet)
    }

    /// Send one video frame if the engine connection exists
    pub fn send_video(&self, frame: &VideoFrame) -> Result<()> {
        self.engine()?.send_video(frame)
    }

    /// Release engine resources and stop reporting; idempotent
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Disposing connection {}", self.id);
            self.cancel.cancel();
        }
    }

    /// Whether [`dispose`](Self::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn engine(&self) -> Result<&Arc<dyn PeerTransport>> {
        self.transport
            .get()
            .ok_or_else(|| Error::Internal(format!("connection {} not ready", self.id)))
    }

    fn enqueue(&self, op: Op) {
        if self.ops.send(op).is_err() {
            trace!("Connection {} worker gone, dropping op", self.id);
        }
    }
}

impl fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConnection")
            .field("id", &self.id)
            .field("ready", &self.transport.get().is_some())
            .field("disposed", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    id: ConnectionId,
    notices: mpsc::UnboundedSender<ConnectionNotice>,
    cancel: CancellationToken,
    slot: Arc<OnceLock<Arc<dyn PeerTransport>>>,
    remote_description_set: bool,
    pending_ice: Vec<IceCandidate>,
    pending_offer: Option<String>,
    deferred: VecDeque<Op>,
    established_reported: bool,
    failure_reported: bool,
}

async fn create_transport(
    factory: Arc<dyn TransportFactory>,
    local_tracks: Vec<LocalTrack>,
    events: TransportEventSender,
) -> Result<Arc<dyn PeerTransport>> {
    let transport = factory.create(events).await?;
    for track in &local_tracks {
        if let Err(e) = transport.add_track(track).await {
            let _ = transport.close().await;
            return Err(e);
        }
    }
    Ok(transport)
}

impl Worker {
    #[instrument(skip_all, fields(connection = %self.id))]
    async fn run(
        mut self,
        factory: Arc<dyn TransportFactory>,
        local_tracks: Vec<LocalTrack>,
        mut ops: mpsc::UnboundedReceiver<Op>,
    ) {
        let cancel = self.cancel.clone();
        let (events, mut engine_events) = TransportEventSender::channel();

        let creation = create_transport(factory, local_tracks, events);
        tokio::pin!(creation);

        let transport = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                created = &mut creation => match created {
                    Ok(transport) => break transport,
                    Err(e) => {
                        warn!("Failed to create transport: {}", e);
                        let error = if e.is_retryable() {
                            e
                        } else {
                            Error::TransportConnection(format!("transport not created: {}", e))
                        };
                        self.report_failure(error);
                        return;
                    }
                },
                op = ops.recv() => match op {
                    Some(op) => self.park(op),
                    None => return,
                },
            }
        };

        let _ = self.slot.set(Arc::clone(&transport));
        debug!("Transport ready");

        if let Some(sdp) = self.pending_offer.take() {
            self.execute(&transport, Op::AcceptOffer(sdp), &cancel).await;
        }
        while let Some(op) = self.deferred.pop_front() {
            if cancel.is_cancelled() {
                break;
            }
            self.execute(&transport, op, &cancel).await;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                op = ops.recv() => match op {
                    Some(op) => self.execute(&transport, op, &cancel).await,
                    None => break,
                },
                event = engine_events.recv() => match event {
                    Some(event) => self.translate(event),
                    None => break,
                },
            }
        }

        if let Err(e) = transport.close().await {
            debug!("Error closing transport: {}", e);
        }
        debug!("Connection worker stopped");
    }

    /// Hold an op that arrived before the engine connection exists
    fn park(&mut self, op: Op) {
        match op {
            Op::AcceptOffer(sdp) => {
                if self.pending_offer.replace(sdp).is_some() {
                    debug!("Newer offer replaces the pending one");
                }
            }
            Op::AddIceCandidate(candidate) => self.pending_ice.push(candidate),
            other => self.deferred.push_back(other),
        }
    }

    async fn execute(
        &mut self,
        transport: &Arc<dyn PeerTransport>,
        op: Op,
        cancel: &CancellationToken,
    ) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.apply(transport, op) => {}
        }
    }

    async fn apply(&mut self, transport: &Arc<dyn PeerTransport>, op: Op) {
        match op {
            Op::CreateOffer => {
                let event = match self.offer(transport).await {
                    Ok(offer) => ConnectionEvent::OfferReady(offer),
                    Err(e) => ConnectionEvent::NegotiationFailed(e),
                };
                self.notify(event);
            }
            Op::AcceptOffer(sdp) => {
                let event = match self.answer(transport, sdp).await {
                    Ok(answer) => ConnectionEvent::AnswerReady(answer),
                    Err(e) => ConnectionEvent::NegotiationFailed(e),
                };
                self.notify(event);
            }
            Op::AcceptAnswer(sdp) => {
                let event = match self.apply_answer(transport, sdp).await {
                    Ok(()) => ConnectionEvent::AnswerApplied,
                    Err(e) => ConnectionEvent::NegotiationFailed(e),
                };
                self.notify(event);
            }
            Op::AddIceCandidate(candidate) => {
                if self.remote_description_set {
                    add_candidate(transport, candidate).await;
                } else {
                    trace!("Buffering remote ICE candidate");
                    self.pending_ice.push(candidate);
                }
            }
        }
    }

    async fn offer(&mut self, transport: &Arc<dyn PeerTransport>) -> Result<SessionDescription> {
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        debug!("Local offer applied");
        Ok(offer)
    }

    async fn answer(
        &mut self,
        transport: &Arc<dyn PeerTransport>,
        sdp: String,
    ) -> Result<SessionDescription> {
        transport
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.remote_description_set = true;
        self.flush_ice(transport).await;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        debug!("Remote offer applied, local answer ready");
        Ok(answer)
    }

    async fn apply_answer(
        &mut self,
        transport: &Arc<dyn PeerTransport>,
        sdp: String,
    ) -> Result<()> {
        transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.remote_description_set = true;
        self.flush_ice(transport).await;
        debug!("Remote answer applied");
        Ok(())
    }

    async fn flush_ice(&mut self, transport: &Arc<dyn PeerTransport>) {
        let buffered = std::mem::take(&mut self.pending_ice);
        if !buffered.is_empty() {
            debug!("Flushing {} buffered ICE candidates", buffered.len());
        }
        for candidate in buffered {
            add_candidate(transport, candidate).await;
        }
    }

    fn translate(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IceCandidate(candidate) => {
                self.notify(ConnectionEvent::LocalIceCandidate(candidate));
            }
            TransportEvent::TrackReceived(track) => {
                self.notify(ConnectionEvent::TrackReceived(track));
            }
            TransportEvent::StateChanged(PeerConnectionState::Connected) => {
                if !self.established_reported {
                    self.established_reported = true;
                    info!("Transport connected");
                    self.notify(ConnectionEvent::Established);
                }
            }
            TransportEvent::StateChanged(
                state @ (PeerConnectionState::Failed | PeerConnectionState::Disconnected),
            ) => {
                self.report_failure(Error::TransportConnection(format!(
                    "connection state {:?}",
                    state
                )));
            }
            TransportEvent::StateChanged(state) => trace!("Transport state {:?}", state),
        }
    }

    fn report_failure(&mut self, error: Error) {
        if self.failure_reported || self.cancel.is_cancelled() {
            return;
        }
        self.failure_reported = true;
        self.notify(ConnectionEvent::Failed(error));
    }

    fn notify(&self, event: ConnectionEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.notices.send(ConnectionNotice {
            connection: self.id,
            event,
        });
    }
}

async fn add_candidate(transport: &Arc<dyn PeerTransport>, candidate: IceCandidate) {
    if let Err(e) = transport.add_ice_candidate(candidate).await {
        warn!("Ignoring ICE candidate: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Script {
        calls: Mutex<Vec<String>>,
        fail_create: bool,
        fail_remote: bool,
        reject_candidate: Option<String>,
    }

    struct ScriptedTransport {
        script: Arc<Script>,
    }

    #[async_trait]
    impl PeerTransport for ScriptedTransport {
        async fn create_offer(&self) -> Result<SessionDescription> {
            self.script.calls.lock().push("create_offer".into());
            Ok(SessionDescription::offer("offer-sdp"))
        }
        async fn create_answer(&self) -> Result<SessionDescription> {
            self.script.calls.lock().push("create_answer".into());
            Ok(SessionDescription::answer("answer-sdp"))
        }
        async fn set_local_description(&self, d: SessionDescription) -> Result<()> {
            self.script.calls.lock().push(format!("set_local:{}", d.sdp));
            Ok(())
        }
        async fn set_remote_description(&self, d: SessionDescription) -> Result<()> {
            self.script.calls.lock().push(format!("set_remote:{}", d.sdp));
            if self.script.fail_remote {
                return Err(Error::Negotiation("bad sdp".into()));
            }
            Ok(())
        }
        async fn add_ice_candidate(&self, c: IceCandidate) -> Result<()> {
            self.script.calls.lock().push(format!("ice:{}", c.candidate));
            if self.script.reject_candidate.as_deref() == Some(c.candidate.as_str()) {
                return Err(Error::IceCandidate("rejected".into()));
            }
            Ok(())
        }
        async fn add_track(&self, t: &LocalTrack) -> Result<()> {
            self.script.calls.lock().push(format!("add_track:{}", t.id));
            Ok(())
        }
        async fn remove_track(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        fn send_audio(&self, _p: &AudioPacket) -> Result<()> {
            Ok(())
        }
        fn send_video(&self, _f: &VideoFrame) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            self.script.calls.lock().push("close".into());
            Ok(())
        }
    }

    struct ScriptedFactory {
        script: Arc<Script>,
        gate: Option<Arc<Notify>>,
        events: Mutex<Option<TransportEventSender>>,
    }

    impl ScriptedFactory {
        fn new(script: Arc<Script>) -> Self {
            Self {
                script,
                gate: None,
                events: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TransportFactory for ScriptedFactory {
        async fn create(&self, events: TransportEventSender) -> Result<Arc<dyn PeerTransport>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.script.fail_create {
                return Err(Error::WebRtc("engine unavailable".into()));
            }
            *self.events.lock() = Some(events);
            Ok(Arc::new(ScriptedTransport {
                script: Arc::clone(&self.script),
            }))
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ConnectionNotice>) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("notice timed out")
            .expect("notice channel closed")
            .event
    }

    fn candidate(name: &str) -> IceCandidate {
        IceCandidate::new(name)
    }

    #[tokio::test]
    async fn test_create_offer_applies_local_description() {
        let script = Arc::new(Script::default());
        let factory = Arc::new(ScriptedFactory::new(Arc::clone(&script)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conn = SessionConnection::spawn(factory, vec![LocalTrack::audio("mic", "s", 2)], tx);
        conn.create_offer();

        match next(&mut rx).await {
            ConnectionEvent::OfferReady(offer) => assert_eq!(offer.sdp, "offer-sdp"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            *script.calls.lock(),
            vec!["add_track:mic", "create_offer", "set_local:offer-sdp"]
        );
    }

    #[tokio::test]
    async fn test_ice_buffered_until_remote_description_then_flushed_in_order() {
        let script = Arc::new(Script::default());
        let factory = Arc::new(ScriptedFactory::new(Arc::clone(&script)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conn = SessionConnection::spawn(factory, vec![], tx);
        conn.create_offer();
        conn.add_ice_candidate(candidate("c1"));
        conn.add_ice_candidate(candidate("c2"));
        assert!(matches!(next(&mut rx).await, ConnectionEvent::OfferReady(_)));

        conn.accept_answer("remote-answer".into());
        conn.add_ice_candidate(candidate("c3"));
        assert!(matches!(next(&mut rx).await, ConnectionEvent::AnswerApplied));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = script.calls.lock().clone();
        let ice: Vec<&String> = calls.iter().filter(|c| c.starts_with("ice:")).collect();
        assert_eq!(ice, vec!["ice:c1", "ice:c2", "ice:c3"]);

        let remote_at = calls.iter().position(|c| c == "set_remote:remote-answer").unwrap();
        let first_ice = calls.iter().position(|c| c == "ice:c1").unwrap();
        assert!(remote_at < first_ice);
    }

    #[tokio::test]
    async fn test_offer_parked_while_transport_is_created() {
        let script = Arc::new(Script::default());
        let gate = Arc::new(Notify::new());
        let factory = Arc::new(ScriptedFactory {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedFactory::new(Arc::clone(&script))
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conn = SessionConnection::spawn(factory, vec![], tx);
        conn.add_ice_candidate(candidate("early"));
        conn.accept_offer("remote-offer".into());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(script.calls.lock().is_empty());

        gate.notify_one();
        match next(&mut rx).await {
            ConnectionEvent::AnswerReady(answer) => assert_eq!(answer.sdp, "answer-sdp"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            *script.calls.lock(),
            vec![
                "set_remote:remote-offer",
                "ice:early",
                "create_answer",
                "set_local:answer-sdp"
            ]
        );
    }

    #[tokio::test]
    async fn test_candidate_failure_is_not_fatal() {
        let script = Arc::new(Script {
            reject_candidate: Some("bad".into()),
            ..Default::default()
        });
        let factory = Arc::new(ScriptedFactory::new(Arc::clone(&script)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conn = SessionConnection::spawn(factory, vec![], tx);
        conn.add_ice_candidate(candidate("bad"));
        conn.add_ice_candidate(candidate("good"));
        conn.accept_offer("remote-offer".into());

        assert!(matches!(next(&mut rx).await, ConnectionEvent::AnswerReady(_)));
        let calls = script.calls.lock().clone();
        assert!(calls.contains(&"ice:good".to_string()));
    }

    #[tokio::test]
    async fn test_remote_description_failure_reported() {
        let script = Arc::new(Script {
            fail_remote: true,
            ..Default::default()
        });
        let factory = Arc::new(ScriptedFactory::new(Arc::clone(&script)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conn = SessionConnection::spawn(factory, vec![], tx);
        conn.accept_offer("remote-offer".into());
        match next(&mut rx).await {
            ConnectionEvent::NegotiationFailed(Error::Negotiation(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_creation_failure_reported_as_retryable() {
        let script = Arc::new(Script {
            fail_create: true,
            ..Default::default()
        });
        let factory = Arc::new(ScriptedFactory::new(Arc::clone(&script)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conn = SessionConnection::spawn(factory, vec![], tx);
        conn.create_offer();
        match next(&mut rx).await {
            ConnectionEvent::Failed(e) => {
                assert!(matches!(e, Error::TransportConnection(_)));
                assert!(e.is_retryable());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_state_changes_translate_once() {
        let script = Arc::new(Script::default());
        let factory = Arc::new(ScriptedFactory::new(Arc::clone(&script)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let shared: Arc<dyn TransportFactory> = Arc::clone(&factory) as Arc<dyn TransportFactory>;
        let conn = SessionConnection::spawn(shared, vec![], tx);
        conn.create_offer();
        assert!(matches!(next(&mut rx).await, ConnectionEvent::OfferReady(_)));

        let events = factory.events.lock().clone().unwrap();
        events.emit(TransportEvent::StateChanged(PeerConnectionState::Connected));
        events.emit(TransportEvent::StateChanged(PeerConnectionState::Connected));
        events.emit(TransportEvent::StateChanged(PeerConnectionState::Disconnected));
        events.emit(TransportEvent::StateChanged(PeerConnectionState::Failed));

        assert!(matches!(next(&mut rx).await, ConnectionEvent::Established));
        assert!(matches!(next(&mut rx).await, ConnectionEvent::Failed(_)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispose_closes_transport_and_silences_events() {
        let script = Arc::new(Script::default());
        let factory = Arc::new(ScriptedFactory::new(Arc::clone(&script)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let shared: Arc<dyn TransportFactory> = Arc::clone(&factory) as Arc<dyn TransportFactory>;
        let conn = SessionConnection::spawn(shared, vec![], tx);
        conn.create_offer();
        assert!(matches!(next(&mut rx).await, ConnectionEvent::OfferReady(_)));

        conn.dispose();
        conn.dispose();
        assert!(conn.is_disposed());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(script.calls.lock().contains(&"close".to_string()));

        let events = factory.events.lock().clone().unwrap();
        events.emit(TransportEvent::StateChanged(PeerConnectionState::Connected));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_before_ready_is_an_error() {
        let script = Arc::new(Script::default());
        let gate = Arc::new(Notify::new());
        let factory = Arc::new(ScriptedFactory {
            gate: Some(gate),
            ..ScriptedFactory::new(script)
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn = SessionConnection::spawn(factory, vec![], tx);
        let packet = AudioPacket {
            samples: vec![0.0; 960],
            channels: 1,
            sample_rate: 48000,
        };
        assert!(conn.send_audio(&packet).is_err());
    }
}
