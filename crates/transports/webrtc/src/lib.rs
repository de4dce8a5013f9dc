//! Peer-to-peer streaming session layer for Studiocast broadcast channels
//!
//! A studio host captures audio/video from a local source and distributes it
//! to remote viewers over per-channel peer connections. Every channel runs an
//! independent negotiation through a stateless signaling relay, retries with
//! an adaptive timeout, and falls back to local content when it cannot
//! connect.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Application (studio UI, authority layer)                │
//! │  ↓ start_streaming / start_receiving / stop_channel      │
//! │  ChannelRegistry                                         │
//! │  ├─ inbound router (relay → channel by ChannelId)        │
//! │  └─ ChannelSession actor per channel                     │
//! │     ├─ RetryState (adaptive timeout, retry budget)       │
//! │     ├─ ConnectionSet (one per viewer in fan-out mode)    │
//! │     │   └─ SessionConnection → PeerTransport (webrtc)    │
//! │     └─ AudioPacketizer (fixed-duration packets)          │
//! │  ↕ SignalingRelay (WebSocket or in-process)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use studiocast_webrtc::{ChannelRegistry, StreamingConfig, WebRtcEngine, WebSocketRelay};
//!
//! let relay = WebSocketRelay::connect("ws://localhost:8080", 7.into()).await?;
//! let registry = ChannelRegistry::builder()
//!     .config(StreamingConfig::default())
//!     .relay(Arc::new(relay))
//!     .transport_factory(Arc::new(WebRtcEngine::new(StreamingConfig::default())))
//!     .media_source(source)
//!     .build()?;
//!
//! let audio = registry.audio_input("StudioLive");
//! registry.start_streaming("StudioLive", "session-1").await?;
//! audio.push(samples, 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::{AudioConfig, ConnectionConfig, StreamingConfig, TurnServerConfig, VideoConfig};
pub use error::{Error, Result};
pub use media::{
    AudioChunk, AudioInput, AudioPacketizer, AudioSink, LocalTrack, MediaSource, RemoteMediaSink,
    RemoteTrack, TrackKind, VideoFrame,
};
pub use session::{
    ChannelEvent, ChannelId, ChannelRegistry, ChannelRegistryBuilder, ChannelSnapshot,
    ChannelState, LocalFallbackReason, ParticipantId, Role, SessionId,
};
pub use signaling::{
    LocalRelayHub, SignalingEnvelope, SignalingMessage, SignalingRelay, WebSocketRelay,
};
pub use transport::{PeerTransport, TransportFactory, WebRtcEngine};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
