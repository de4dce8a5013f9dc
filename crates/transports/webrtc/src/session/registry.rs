//! Channel registry
//!
//! Directory of channel sessions keyed by channel id. Channels are created
//! lazily on first use and live until the registry shuts down. A background
//! task drains the relay's inbound stream and routes each envelope to its
//! channel; envelopes for channels this participant never touched are
//! dropped.

use super::channel::{ChannelContext, ChannelHandle, ChannelSession};
use super::{ChannelEvent, ChannelId, ChannelSnapshot, ChannelState, ParticipantId, SessionId};
use crate::config::StreamingConfig;
use crate::media::{AudioInput, MediaSource, RemoteMediaSink};
use crate::signaling::{SignalingEnvelope, SignalingRelay};
use crate::transport::TransportFactory;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Default capacity of the event broadcast channel
const DEFAULT_EVENT_CAPACITY: usize = 256;

struct RegistryInner {
    ctx: ChannelContext,
    channels: Mutex<HashMap<ChannelId, ChannelHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl RegistryInner {
    fn channel(&self, channel: &ChannelId) -> ChannelHandle {
        let mut channels = self.channels.lock();
        if let Some(handle) = channels.get(channel) {
            return handle.clone();
        }

        debug!("Creating channel session {}", channel);
        let (handle, task) =
            ChannelSession::spawn(channel.clone(), self.ctx.clone(), self.cancel.child_token());
        channels.insert(channel.clone(), handle.clone());
        self.tasks.lock().push(task);
        handle
    }

    fn existing(&self, channel: &ChannelId) -> Option<ChannelHandle> {
        self.channels.lock().get(channel).cloned()
    }

    fn route(&self, envelope: SignalingEnvelope) -> bool {
        let Some(handle) = self.existing(&envelope.channel) else {
            trace!("No session for channel {}, dropping", envelope.channel);
            return false;
        };
        match handle.deliver(envelope) {
            Ok(()) => true,
            Err(e) => {
                warn!("Routing failed: {}", e);
                false
            }
        }
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Directory of channel sessions and the application-facing API
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

impl ChannelRegistry {
    /// Start configuring a registry
    pub fn builder() -> ChannelRegistryBuilder {
        ChannelRegistryBuilder::new()
    }

    /// Participant id this registry signs envelopes with
    pub fn local_participant(&self) -> ParticipantId {
        self.inner.ctx.local
    }

    /// Configuration shared by all channels
    pub fn config(&self) -> &StreamingConfig {
        &self.inner.ctx.config
    }

    /// Stream the local media source on `channel` under `session_id`
    pub async fn start_streaming(
        &self,
        channel: impl Into<ChannelId>,
        session_id: impl Into<SessionId>,
    ) -> Result<()> {
        let channel = channel.into();
        self.ensure_running()?;
        self.inner
            .channel(&channel)
            .start_streaming(session_id.into())
            .await
    }

    /// Receive `channel`'s stream under `session_id`
    pub async fn start_receiving(
        &self,
        channel: impl Into<ChannelId>,
        session_id: impl Into<SessionId>,
    ) -> Result<()> {
        let channel = channel.into();
        self.ensure_running()?;
        self.inner
            .channel(&channel)
            .start_receiving(session_id.into())
            .await
    }

    /// Tear down `channel`'s session; a channel never started is left alone
    pub async fn stop_channel(&self, channel: impl Into<ChannelId>) -> Result<()> {
        let channel = channel.into();
        match self.inner.existing(&channel) {
            Some(handle) => handle.stop().await,
            None => Ok(()),
        }
    }

    /// Inspect a channel's session
    pub async fn snapshot(&self, channel: &ChannelId) -> Result<Option<ChannelSnapshot>> {
        match self.inner.existing(channel) {
            Some(handle) => handle.snapshot().await.map(Some),
            None => Ok(None),
        }
    }

    /// Public state of a channel (Idle if never started)
    pub async fn state(&self, channel: &ChannelId) -> Result<ChannelState> {
        Ok(self
            .snapshot(channel)
            .await?
            .map_or(ChannelState::Idle, |snapshot| snapshot.state))
    }

    /// Subscribe to state changes, local fallbacks and received tracks
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.ctx.events.subscribe()
    }

    /// Producer handle for `channel`'s audio packetizer
    ///
    /// Creates the channel session if needed so capture can start before
    /// streaming does.
    pub fn audio_input(&self, channel: impl Into<ChannelId>) -> AudioInput {
        self.inner.channel(&channel.into()).audio_input()
    }

    /// Route one inbound relay envelope; returns whether a channel took it
    pub fn route_inbound(&self, envelope: SignalingEnvelope) -> bool {
        self.inner.route(envelope)
    }

    /// Channels that have a session actor
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.inner.channels.lock().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Stop every channel actor and the routing task
    pub async fn shutdown(&self) {
        info!("Shutting down channel registry");
        self.inner.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Channel task ended abnormally: {}", e);
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::ChannelClosed("registry has shut down".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("local", &self.inner.ctx.local)
            .field("channels", &self.channels())
            .finish()
    }
}

/// Builder for [`ChannelRegistry`]
pub struct ChannelRegistryBuilder {
    config: StreamingConfig,
    relay: Option<Arc<dyn SignalingRelay>>,
    factory: Option<Arc<dyn TransportFactory>>,
    source: Option<Arc<dyn MediaSource>>,
    sink: Option<Arc<dyn RemoteMediaSink>>,
    event_capacity: usize,
}

impl Default for ChannelRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistryBuilder {
    /// Builder with default configuration
    pub fn new() -> Self {
        Self {
            config: StreamingConfig::default(),
            relay: None,
            factory: None,
            source: None,
            sink: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Streaming configuration
    pub fn config(mut self, config: StreamingConfig) -> Self {
        self.config = config;
        self
    }

    /// Signaling relay (required)
    pub fn relay(mut self, relay: Arc<dyn SignalingRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Transport engine factory (required)
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Captured media distributed when streaming
    pub fn media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Render/playback collaborator for received tracks
    pub fn media_sink(mut self, sink: Arc<dyn RemoteMediaSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Buffered events per subscriber before lagging
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate and start routing inbound relay messages
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<ChannelRegistry> {
        self.config.validate()?;

        let relay = self
            .relay
            .ok_or_else(|| Error::InvalidConfig("a signaling relay is required".to_string()))?;
        let factory = self
            .factory
            .ok_or_else(|| Error::InvalidConfig("a transport factory is required".to_string()))?;
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_capacity must be greater than 0".to_string(),
            ));
        }

        let mut inbound = relay.take_inbound().ok_or_else(|| {
            Error::InvalidConfig("relay inbound stream is already in use".to_string())
        })?;

        let (events, _) = broadcast::channel(self.event_capacity);
        let local = relay.local_participant();
        let inner = Arc::new(RegistryInner {
            ctx: ChannelContext {
                local,
                config: Arc::new(self.config),
                relay,
                factory,
                source: self.source,
                sink: self.sink,
                events,
            },
            channels: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        let weak: Weak<RegistryInner> = Arc::downgrade(&inner);
        let cancel = inner.cancel.clone();
        let router = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    envelope = inbound.recv() => {
                        let Some(envelope) = envelope else {
                            info!("Relay inbound stream closed");
                            break;
                        };
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.route(envelope);
                    }
                }
            }
            debug!("Inbound router stopped");
        });
        inner.tasks.lock().push(router);

        info!("Channel registry ready as {}", local);
        Ok(ChannelRegistry { inner })
    }
}
