//! Real-time transport engine boundary
//!
//! The engine performs SDP negotiation and media transport. The session layer
//! only drives it through [`PeerTransport`] and listens to the
//! [`TransportEvent`]s it emits.

pub mod webrtc_engine;

use crate::media::{AudioPacket, LocalTrack, RemoteTrack, VideoFrame};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use webrtc_engine::WebRtcEngine;

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Answer
    Answer,
}

/// Session description exchanged as Offer/Answer payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an offer SDP
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap an answer SDP
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the candidate line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Connection state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity failed
    Failed,
    /// Closed locally
    Closed,
}

/// Inbound engine callbacks
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local ICE candidate was gathered
    IceCandidate(IceCandidate),
    /// A remote track started
    TrackReceived(RemoteTrack),
    /// The connection state changed
    StateChanged(PeerConnectionState),
}

/// Callback sink handed to a transport when it is created
///
/// Events emitted after the owning connection is disposed are discarded.
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSender {
    /// Create a sender/receiver pair
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event; returns false once the listener is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the listener has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One transport-engine connection
///
/// Negotiation operations are asynchronous and may fail. The send path is
/// synchronous so the packetizer can drain under its lock; implementations
/// queue the data for their own pacing task.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create an SDP offer (does not set it locally)
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an SDP answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach a local track to be sent
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    /// Detach a local track
    async fn remove_track(&self, track_id: &str) -> Result<()>;

    /// Queue one fixed-duration audio packet for sending
    fn send_audio(&self, packet: &AudioPacket) -> Result<()>;

    /// Queue one pre-encoded video frame for sending
    fn send_video(&self, frame: &VideoFrame) -> Result<()>;

    /// Release engine resources
    async fn close(&self) -> Result<()>;
}

/// Creates transport connections
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a connection whose callbacks are delivered to `events`
    async fn create(&self, events: TransportEventSender) -> Result<Arc<dyn PeerTransport>>;
}
