//! Channel session actor
//!
//! One actor per channel owns the session state (role, current session id,
//! retry counter, connection map) and processes relay messages, connection
//! notices, timers and media ticks one at a time. Nothing else mutates that
//! state, so every inbound handler can re-validate against it before acting.

use super::{
    ChannelEvent, ChannelId, ChannelSnapshot, ChannelState, LocalFallbackReason, ParticipantId,
    Role, SessionId,
};
use crate::config::StreamingConfig;
use crate::media::{
    AudioInput, AudioPacket, AudioPacketizer, AudioSink, LocalTrack, MediaSource, RemoteMediaSink,
    TrackKind,
};
use crate::peer::{
    ConnectionEntry, ConnectionEvent, ConnectionKey, ConnectionNotice, ConnectionSet, RetryDecision,
    RetryState, SessionConnection,
};
use crate::signaling::{SignalingEnvelope, SignalingMessage, SignalingRelay};
use crate::transport::{IceCandidate, TransportFactory};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Collaborators shared by every channel of a registry
#[derive(Clone)]
pub(crate) struct ChannelContext {
    pub local: ParticipantId,
    pub config: Arc<StreamingConfig>,
    pub relay: Arc<dyn SignalingRelay>,
    pub factory: Arc<dyn TransportFactory>,
    pub source: Option<Arc<dyn MediaSource>>,
    pub sink: Option<Arc<dyn RemoteMediaSink>>,
    pub events: broadcast::Sender<ChannelEvent>,
}

#[derive(Debug)]
enum ChannelCommand {
    Start {
        session_id: SessionId,
        role: Role,
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Signal(SignalingEnvelope),
    Snapshot {
        reply: oneshot::Sender<ChannelSnapshot>,
    },
}

/// Handle to a running channel session
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    channel: ChannelId,
    sender: mpsc::UnboundedSender<ChannelCommand>,
    cancel: CancellationToken,
    audio: AudioInput,
}

impl ChannelHandle {
    /// Channel this handle drives
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Begin distributing the local media source under `session_id`
    ///
    /// Returns once the channel has left its previous session and entered
    /// Connecting (or Failed when the source is unusable).
    pub async fn start_streaming(&self, session_id: SessionId) -> Result<()> {
        self.start(session_id, Role::Offerer).await
    }

    /// Begin receiving the channel's stream under `session_id`
    pub async fn start_receiving(&self, session_id: SessionId) -> Result<()> {
        self.start(session_id, Role::Answerer).await
    }

    /// Tear the session down and return to Idle
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ChannelCommand::Stop { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Hand an inbound relay message to the session
    pub fn deliver(&self, envelope: SignalingEnvelope) -> Result<()> {
        self.send(ChannelCommand::Signal(envelope))
    }

    /// Current session state
    pub async fn snapshot(&self) -> Result<ChannelSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(ChannelCommand::Snapshot { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Producer handle for this channel's audio packetizer
    pub fn audio_input(&self) -> AudioInput {
        self.audio.clone()
    }

    /// Stop the actor
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the actor has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn start(&self, session_id: SessionId, role: Role) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ChannelCommand::Start {
            session_id,
            role,
            reply,
        })?;
        rx.await.map_err(|_| self.closed())
    }

    fn send(&self, command: ChannelCommand) -> Result<()> {
        self.sender.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> Error {
        Error::ChannelClosed(format!("channel {} has shut down", self.channel))
    }
}

/// Offer held while no connection exists (between retries)
#[derive(Debug)]
struct PendingOffer {
    sdp: String,
    from: ParticipantId,
    candidates: Vec<IceCandidate>,
}

/// Per-channel orchestrator
pub(crate) struct ChannelSession {
    channel: ChannelId,
    ctx: ChannelContext,
    cancel: CancellationToken,
    packetizer: Arc<AudioPacketizer>,

    state: ChannelState,
    session_id: Option<SessionId>,
    role: Option<Role>,
    retry: RetryState,
    connections: ConnectionSet,
    notices: mpsc::UnboundedSender<ConnectionNotice>,

    connect_deadline: Option<Instant>,
    retry_at: Option<Instant>,
    pending_offer: Option<PendingOffer>,
    current_offer: Option<String>,
    current_candidates: Vec<IceCandidate>,
    local_tracks: Vec<LocalTrack>,
    audio_enabled: bool,
    video_enabled: bool,
}

impl ChannelSession {
    /// Spawn the actor for `channel`
    pub(crate) fn spawn(
        channel: ChannelId,
        ctx: ChannelContext,
        cancel: CancellationToken,
    ) -> (ChannelHandle, JoinHandle<()>) {
        let (sender, commands) = mpsc::unbounded_channel();
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let packetizer = Arc::new(AudioPacketizer::new(&ctx.config.audio));

        let handle = ChannelHandle {
            channel: channel.clone(),
            sender,
            cancel: cancel.clone(),
            audio: AudioInput::new(Arc::clone(&packetizer)),
        };

        let session = ChannelSession {
            channel,
            retry: RetryState::new(&ctx.config.connection),
            ctx,
            cancel,
            packetizer,
            state: ChannelState::Idle,
            session_id: None,
            role: None,
            connections: ConnectionSet::new(),
            notices,
            connect_deadline: None,
            retry_at: None,
            pending_offer: None,
            current_offer: None,
            current_candidates: Vec::new(),
            local_tracks: Vec::new(),
            audio_enabled: false,
            video_enabled: false,
        };

        let task = tokio::spawn(session.run(commands, notice_rx));
        (handle, task)
    }

    #[instrument(skip_all, fields(channel = %self.channel))]
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
        mut notices: mpsc::UnboundedReceiver<ConnectionNotice>,
    ) {
        let mut audio_tick = tokio::time::interval(self.ctx.config.audio.packet_interval());
        audio_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut video_tick = tokio::time::interval(self.ctx.config.video.frame_interval());
        video_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let cancel = self.cancel.clone();
        debug!("Channel session started");

        loop {
            let streaming = self.state == ChannelState::Streaming;
            let send_audio = streaming && self.audio_enabled;
            let send_video = streaming && self.video_enabled;

            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(notice) = notices.recv() => self.on_notice(notice).await,
                _ = sleep_until(self.connect_deadline) => self.on_connect_timeout(),
                _ = sleep_until(self.retry_at) => self.on_retry_due().await,
                _ = audio_tick.tick(), if send_audio => self.drain_audio(),
                _ = video_tick.tick(), if send_video => self.forward_video(),
            }
        }

        let disposed = self.connections.dispose_all();
        debug!("Channel session stopped ({} connections disposed)", disposed);
    }

    async fn handle_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::Start {
                session_id,
                role,
                reply,
            } => {
                self.start(session_id, role).await;
                let _ = reply.send(());
            }
            ChannelCommand::Stop { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
            ChannelCommand::Signal(envelope) => self.on_signal(envelope).await,
            ChannelCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // ---------------------------------------------------------------------
    // Session lifecycle
    // ---------------------------------------------------------------------

    async fn start(&mut self, session_id: SessionId, role: Role) {
        if self.state.has_session()
            && self.role == Some(role)
            && self.session_id.as_ref() == Some(&session_id)
        {
            debug!("Session {} already active as {:?}", session_id, role);
            return;
        }

        if self.state.has_session() {
            info!(
                "Leaving session {:?} for {}",
                self.session_id.as_ref().map(SessionId::as_str),
                session_id
            );
            self.teardown();
        }

        self.retry.reset();
        self.pending_offer = None;
        self.clear_current_offer();
        self.session_id = Some(session_id);
        self.role = Some(role);

        if role == Role::Offerer {
            if let Err(e) = self.prepare_source() {
                warn!("Cannot stream: {}", e);
                self.fail();
                return;
            }
        } else {
            self.local_tracks.clear();
            self.audio_enabled = false;
            self.video_enabled = false;
        }

        info!(
            "Starting session {:?} as {:?}",
            self.session_id.as_ref().map(SessionId::as_str),
            role
        );
        self.transition(ChannelState::Connecting);
        self.begin_attempt().await;
    }

    fn prepare_source(&mut self) -> Result<()> {
        let source = self
            .ctx
            .source
            .as_ref()
            .ok_or_else(|| Error::ResourceUnavailable("no media source configured".to_string()))?;
        if !source.is_available() {
            return Err(Error::ResourceUnavailable(
                "media source is not producing".to_string(),
            ));
        }

        let tracks = source.local_tracks();
        if tracks.is_empty() {
            return Err(Error::ResourceUnavailable(
                "media source exposes no tracks".to_string(),
            ));
        }

        self.audio_enabled = tracks.iter().any(|t| t.kind == TrackKind::Audio);
        self.video_enabled =
            self.ctx.config.video.enabled && tracks.iter().any(|t| t.kind == TrackKind::Video);
        self.local_tracks = tracks;
        Ok(())
    }

    /// Run the role's setup for a fresh attempt
    async fn begin_attempt(&mut self) {
        let now = Instant::now();
        self.connect_deadline = Some(now + self.retry.timeout());

        match self.role {
            Some(Role::Offerer) if self.ctx.config.fan_out_enabled => {
                debug!("Waiting for offer requests");
            }
            Some(Role::Offerer) => {
                self.open_connection(None, None).connection.create_offer();
            }
            Some(Role::Answerer) => {
                let pending = self.pending_offer.take();
                match pending {
                    Some(pending) => {
                        debug!("Applying offer from {} held during backoff", pending.from);
                        let entry = self.open_connection(None, Some(pending.from));
                        entry.offered = true;
                        entry.offer_sdp = Some(pending.sdp.clone());
                        entry.connection.accept_offer(pending.sdp);
                        for candidate in pending.candidates {
                            entry.connection.add_ice_candidate(candidate);
                        }
                    }
                    None => {
                        self.open_connection(None, None);
                        if let Err(e) = self.request_offer().await {
                            self.handle_failure(None, e);
                        }
                    }
                }
            }
            None => {}
        }
    }

    async fn request_offer(&self) -> Result<()> {
        let session_id = self.current_session()?;
        debug!("Requesting offer for {}", session_id);
        self.ctx.relay.request_offer(&self.channel, session_id).await
    }

    fn open_connection(
        &mut self,
        key: ConnectionKey,
        remote: Option<ParticipantId>,
    ) -> &mut ConnectionEntry {
        let tracks = match self.role {
            Some(Role::Offerer) => self.local_tracks.clone(),
            _ => Vec::new(),
        };
        let connection =
            SessionConnection::spawn(Arc::clone(&self.ctx.factory), tracks, self.notices.clone());
        debug!("Opened connection {} for {:?}", connection.id(), key);
        self.connections.insert(key, ConnectionEntry::new(connection, remote))
    }

    fn on_established(&mut self, elapsed: std::time::Duration) {
        self.retry.on_established(elapsed);
        self.connect_deadline = None;
        self.retry_at = None;

        let next = match self.role {
            Some(Role::Offerer) => ChannelState::Streaming,
            _ => ChannelState::Receiving,
        };
        info!("Connected after {:?}", elapsed);
        self.transition(next);
    }

    fn on_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if self.state == ChannelState::Connecting {
            let timeout = self.retry.timeout();
            self.handle_failure(
                None,
                Error::TransportConnection(format!("not connected within {:?}", timeout)),
            );
        }
    }

    async fn on_retry_due(&mut self) {
        self.retry_at = None;
        if self.state == ChannelState::Connecting {
            debug!("Retry attempt {} starting", self.retry.retry_count());
            self.begin_attempt().await;
        }
    }

    /// Funnel for negotiation errors, transport failures and timeouts
    fn handle_failure(&mut self, key: Option<ConnectionKey>, error: Error) {
        if matches!(
            self.state,
            ChannelState::Disconnecting | ChannelState::Failed | ChannelState::Idle
        ) {
            debug!("Ignoring failure while {:?}: {}", self.state, error);
            return;
        }
        if !error.is_retryable() {
            if error.is_fatal_for_session() {
                error!("Session cannot continue: {}", error);
            } else {
                error!("Unrecoverable session error: {}", error);
            }
            self.fail();
            return;
        }

        // A viewer's failure only takes down that viewer's entry
        let viewer = match key {
            Some(Some(viewer)) if self.is_fan_out_offerer() => Some(viewer),
            _ => None,
        };
        if let Some(viewer) = viewer {
            let key = Some(viewer);
            let remaining = self.connections.established_excluding(Some(&key));
            self.connections.remove(&key);
            if remaining > 0 {
                warn!(
                    "Viewer {} dropped ({}); {} viewers still connected",
                    viewer, error, remaining
                );
                return;
            }
        }

        warn!("Attempt failed: {}", error);
        match self.retry.on_failure() {
            RetryDecision::Retry {
                attempt,
                max_retries,
                backoff,
            } => {
                if viewer.is_some() && !self.connections.is_empty() {
                    debug!(
                        "{} other viewers still negotiating; restarting the timeout",
                        self.connections.len()
                    );
                    self.connect_deadline = Some(Instant::now() + self.retry.timeout());
                } else {
                    self.connections.dispose_all();
                    self.clear_current_offer();
                    self.connect_deadline = None;
                    self.retry_at = Some(Instant::now() + backoff);
                }
                if self.state != ChannelState::Connecting {
                    self.transition(ChannelState::Connecting);
                }
                info!(
                    "Retry {}/{} in {:?} (timeout {:?})",
                    attempt,
                    max_retries,
                    backoff,
                    self.retry.timeout()
                );
            }
            RetryDecision::Exhausted { retries } => {
                error!("Giving up after {} retries: {}", retries, error);
                self.fail();
            }
        }
    }

    /// Enter Failed and tell the application to show local content
    fn fail(&mut self) {
        self.connections.dispose_all();
        self.connect_deadline = None;
        self.retry_at = None;
        self.pending_offer = None;
        self.clear_current_offer();
        self.transition(ChannelState::Failed);
        self.emit(ChannelEvent::ShowLocal {
            channel: self.channel.clone(),
            reason: LocalFallbackReason::Failed,
        });
    }

    fn teardown(&mut self) {
        if self.state == ChannelState::Idle {
            return;
        }

        self.transition(ChannelState::Disconnecting);
        self.connect_deadline = None;
        self.retry_at = None;
        let disposed = self.connections.dispose_all();
        self.pending_offer = None;
        self.clear_current_offer();
        self.packetizer.clear();
        self.role = None;
        self.session_id = None;
        self.retry.reset();
        self.audio_enabled = false;
        self.video_enabled = false;
        debug!("Torn down ({} connections disposed)", disposed);

        self.transition(ChannelState::Idle);
        self.emit(ChannelEvent::ShowLocal {
            channel: self.channel.clone(),
            reason: LocalFallbackReason::Stopped,
        });
    }

    // ---------------------------------------------------------------------
    // Inbound relay messages
    // ---------------------------------------------------------------------

    async fn on_signal(&mut self, envelope: SignalingEnvelope) {
        if let Err(e) = self.validate(&envelope) {
            trace!("Dropping {}: {}", envelope.message.kind(), e);
            return;
        }

        let sender = envelope.sender;
        match envelope.message {
            SignalingMessage::OfferRequest => match self.role {
                Some(Role::Offerer) => self.on_offer_request(sender).await,
                _ => trace!("Ignoring offer request: not the offerer"),
            },
            SignalingMessage::Offer { sdp } => match self.role {
                Some(Role::Answerer) => self.on_offer(sdp, sender),
                _ => debug!("Ignoring offer from {}: not the answerer", sender),
            },
            SignalingMessage::Answer { sdp } => match self.role {
                Some(Role::Offerer) => self.on_answer(sdp, sender),
                _ => debug!("Ignoring answer from {}: not the offerer", sender),
            },
            SignalingMessage::IceCandidate { candidate } => {
                self.on_remote_candidate(candidate, sender)
            }
        }
    }

    fn validate(&self, envelope: &SignalingEnvelope) -> Result<()> {
        if envelope.channel != self.channel {
            return Err(Error::Validation(format!("channel {}", envelope.channel)));
        }
        if envelope.sender == self.ctx.local {
            return Err(Error::Validation("self-originated".to_string()));
        }
        if !envelope.is_addressed_to(self.ctx.local) {
            return Err(Error::Validation(format!(
                "addressed to {:?}",
                envelope.recipient
            )));
        }
        if !self.state.has_session() {
            return Err(Error::Validation(format!("channel is {:?}", self.state)));
        }
        if self.session_id.as_ref() != Some(&envelope.session_id) {
            return Err(Error::Validation(format!("session {}", envelope.session_id)));
        }
        Ok(())
    }

    async fn on_offer_request(&mut self, from: ParticipantId) {
        if self.ctx.config.fan_out_enabled {
            if self.retry_at.take().is_some() {
                debug!("Offer request from {} ends backoff early", from);
                self.begin_attempt().await;
            }
            info!("Viewer {} requested an offer", from);
            self.open_connection(Some(from), Some(from))
                .connection
                .create_offer();
            return;
        }

        let Some(entry) = self.connections.get(&None) else {
            debug!("Offer request from {} during backoff", from);
            return;
        };
        if entry.answered {
            debug!("Offer request from {} ignored: already answered", from);
            return;
        }
        let Some(offer) = self.current_offer.clone() else {
            trace!("Offer for {} still being created", from);
            return;
        };
        let Ok(session_id) = self.current_session().cloned() else {
            return;
        };
        let candidates = self.current_candidates.clone();
        debug!(
            "Re-sending current offer and {} candidates to {}",
            candidates.len(),
            from
        );
        if let Err(e) = self
            .ctx
            .relay
            .send_offer(&self.channel, &session_id, offer, Some(from))
            .await
        {
            self.handle_failure(Some(None), e);
            return;
        }
        for candidate in candidates {
            if let Err(e) = self
                .ctx
                .relay
                .send_ice_candidate(&self.channel, &session_id, candidate, Some(from))
                .await
            {
                warn!("Failed to relay ICE candidate: {}", e);
            }
        }
    }

    fn on_offer(&mut self, sdp: String, from: ParticipantId) {
        if self.connections.is_empty() {
            if self
                .pending_offer
                .as_ref()
                .is_some_and(|pending| pending.from == from && pending.sdp == sdp)
            {
                trace!("Offer from {} already held", from);
                return;
            }
            debug!("Holding offer from {} until the next attempt", from);
            self.pending_offer = Some(PendingOffer {
                sdp,
                from,
                candidates: Vec::new(),
            });
            return;
        }

        if let Some(entry) = self.connections.get(&None) {
            if entry.remote == Some(from) && entry.offer_sdp.as_deref() == Some(sdp.as_str()) {
                debug!("Duplicate offer from {} ignored", from);
                return;
            }
        }

        let renegotiate = self
            .connections
            .get(&None)
            .map_or(false, |entry| entry.offered);
        if renegotiate {
            info!("New offer from {}; restarting connection", from);
            self.open_connection(None, Some(from));
            if self.state != ChannelState::Connecting {
                self.transition(ChannelState::Connecting);
            }
            self.connect_deadline = Some(Instant::now() + self.retry.timeout());
        }

        if let Some(entry) = self.connections.get_mut(&None) {
            entry.remote = Some(from);
            entry.offered = true;
            entry.offer_sdp = Some(sdp.clone());
            entry.connection.accept_offer(sdp);
        }
    }

    fn on_answer(&mut self, sdp: String, from: ParticipantId) {
        let fan_out = self.ctx.config.fan_out_enabled;
        let key = if fan_out { Some(from) } else { None };

        let Some(entry) = self.connections.get_mut(&key) else {
            debug!("Answer from {} has no connection", from);
            return;
        };
        if entry.answered {
            debug!("Duplicate answer from {}", from);
            return;
        }
        if entry.remote.is_some_and(|remote| remote != from) {
            debug!(
                "Answer from {} but connection belongs to {:?}",
                from, entry.remote
            );
            return;
        }

        entry.remote = Some(from);
        entry.answered = true;
        entry.connection.accept_answer(sdp);
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate, from: ParticipantId) {
        if let Some(pending) = self.pending_offer.as_mut() {
            if pending.from == from {
                pending.candidates.push(candidate);
                return;
            }
        }

        let key = if self.is_fan_out_offerer() { Some(from) } else { None };
        match self.connections.get(&key) {
            Some(entry) if entry.remote == Some(from) => {
                entry.connection.add_ice_candidate(candidate)
            }
            Some(_) => debug!("ICE candidate from {} for someone else's connection", from),
            None => debug!("ICE candidate from {} has no connection", from),
        }
    }

    // ---------------------------------------------------------------------
    // Connection notices
    // ---------------------------------------------------------------------

    async fn on_notice(&mut self, notice: ConnectionNotice) {
        let Some(key) = self.connections.key_of(notice.connection) else {
            trace!("Stale notice from connection {}", notice.connection);
            return;
        };
        if !self.state.has_session() {
            return;
        }
        let Ok(session_id) = self.current_session().cloned() else {
            return;
        };
        let remote = self.connections.get(&key).and_then(|entry| entry.remote);

        match notice.event {
            ConnectionEvent::OfferReady(offer) => {
                if !self.ctx.config.fan_out_enabled {
                    self.current_offer = Some(offer.sdp.clone());
                    self.current_candidates.clear();
                }
                debug!("Relaying offer to {:?}", remote);
                if let Err(e) = self
                    .ctx
                    .relay
                    .send_offer(&self.channel, &session_id, offer.sdp, remote)
                    .await
                {
                    self.handle_failure(Some(key), e);
                }
            }
            ConnectionEvent::AnswerReady(answer) => {
                let Some(offerer) = remote else {
                    self.handle_failure(
                        Some(key),
                        Error::Internal("answer ready without an offerer".to_string()),
                    );
                    return;
                };
                debug!("Relaying answer to {}", offerer);
                if let Err(e) = self
                    .ctx
                    .relay
                    .send_answer(&self.channel, &session_id, answer.sdp, offerer)
                    .await
                {
                    self.handle_failure(Some(key), e);
                }
            }
            ConnectionEvent::AnswerApplied => debug!("Answer from {:?} applied", remote),
            ConnectionEvent::NegotiationFailed(e) | ConnectionEvent::Failed(e) => {
                self.handle_failure(Some(key), e);
            }
            ConnectionEvent::LocalIceCandidate(candidate) => {
                if key.is_none() && self.role == Some(Role::Offerer) {
                    self.current_candidates.push(candidate.clone());
                }
                if let Err(e) = self
                    .ctx
                    .relay
                    .send_ice_candidate(&self.channel, &session_id, candidate, remote)
                    .await
                {
                    warn!("Failed to relay ICE candidate: {}", e);
                }
            }
            ConnectionEvent::TrackReceived(track) => {
                // First media clears the connection timeout
                self.connect_deadline = None;
                let kind = track.kind;
                if let Some(sink) = &self.ctx.sink {
                    sink.on_track(&self.channel, remote, track);
                }
                self.emit(ChannelEvent::TrackReceived {
                    channel: self.channel.clone(),
                    participant: remote,
                    kind,
                });
            }
            ConnectionEvent::Established => {
                let elapsed = match self.connections.get_mut(&key) {
                    Some(entry) => {
                        entry.established = true;
                        entry.started_at.elapsed()
                    }
                    None => return,
                };
                if self.state == ChannelState::Connecting {
                    self.on_established(elapsed);
                } else {
                    info!("Viewer {:?} connected", remote);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Media
    // ---------------------------------------------------------------------

    fn drain_audio(&self) {
        let sink = FanOutSink {
            targets: self.connections.established().collect(),
        };
        self.packetizer.tick(&sink);
    }

    fn forward_video(&self) {
        let Some(frame) = self.ctx.source.as_ref().and_then(|s| s.current_frame()) else {
            return;
        };
        for connection in self.connections.established() {
            if let Err(e) = connection.send_video(&frame) {
                trace!("Video frame dropped for {}: {}", connection.id(), e);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn clear_current_offer(&mut self) {
        self.current_offer = None;
        self.current_candidates.clear();
    }

    fn is_fan_out_offerer(&self) -> bool {
        self.ctx.config.fan_out_enabled && self.role == Some(Role::Offerer)
    }

    fn current_session(&self) -> Result<&SessionId> {
        self.session_id
            .as_ref()
            .ok_or_else(|| Error::Internal("no current session".to_string()))
    }

    fn transition(&mut self, next: ChannelState) {
        let previous = self.state;
        self.state = next;
        debug!("{:?} -> {:?}", previous, next);
        self.emit(ChannelEvent::StateChanged {
            channel: self.channel.clone(),
            session_id: self.session_id.clone(),
            previous,
            current: next,
        });
    }

    fn emit(&self, event: ChannelEvent) {
        // No subscribers is fine
        let _ = self.ctx.events.send(event);
    }

    fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.channel.clone(),
            state: self.state,
            session_id: self.session_id.clone(),
            role: self.role,
            retry_count: self.retry.retry_count(),
            connection_timeout: self.retry.timeout(),
            optimistic_state_enabled: self.retry.optimistic(),
            connection_count: self.connections.len(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Sends each packet to every established connection
///
/// Fails only when every target failed, so one bad viewer does not stall
/// the others.
struct FanOutSink<'a> {
    targets: Vec<&'a SessionConnection>,
}

impl AudioSink for FanOutSink<'_> {
    fn set_data(&self, samples: &[f32], channels: u16, sample_rate: u32) -> Result<()> {
        let packet = AudioPacket {
            samples: samples.to_vec(),
            channels,
            sample_rate,
        };

        let mut failures = 0usize;
        let mut last_error = None;
        for target in &self.targets {
            if let Err(e) = target.send_audio(&packet) {
                trace!("Audio packet dropped for {}: {}", target.id(), e);
                failures += 1;
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) if failures == self.targets.len() => Err(e),
            _ => Ok(()),
        }
    }
}
