//! Signaling relay boundary
//!
//! The relay is a stateless pass-through: it forwards Offer, Answer,
//! IceCandidate and OfferRequest envelopes between participants and never
//! filters on session or role. All policy lives in the channel session.

pub mod local;
pub mod protocol;
pub mod websocket;

use crate::session::{ChannelId, ParticipantId, SessionId};
use crate::transport::IceCandidate;
use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use local::{LocalRelay, LocalRelayHub};
pub use protocol::{SignalingEnvelope, SignalingMessage};
pub use websocket::WebSocketRelay;

/// Reliable, ordered message channel between participants
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Participant id of this endpoint
    fn local_participant(&self) -> ParticipantId;

    /// Deliver an envelope (broadcast, or unicast for answers)
    async fn send(&self, envelope: SignalingEnvelope) -> Result<()>;

    /// Take the inbound envelope stream; only the first caller gets it
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<SignalingEnvelope>>;

    /// Broadcast an offer, optionally addressed to one viewer
    async fn send_offer(
        &self,
        channel: &ChannelId,
        session_id: &SessionId,
        sdp: String,
        recipient: Option<ParticipantId>,
    ) -> Result<()> {
        let mut envelope = SignalingEnvelope::new(
            channel.clone(),
            session_id.clone(),
            self.local_participant(),
            SignalingMessage::Offer { sdp },
        );
        envelope.recipient = recipient;
        self.send(envelope).await
    }

    /// Unicast an answer to the offerer
    async fn send_answer(
        &self,
        channel: &ChannelId,
        session_id: &SessionId,
        sdp: String,
        recipient: ParticipantId,
    ) -> Result<()> {
        let envelope = SignalingEnvelope::new(
            channel.clone(),
            session_id.clone(),
            self.local_participant(),
            SignalingMessage::Answer { sdp },
        )
        .to(recipient);
        self.send(envelope).await
    }

    /// Trickle a local ICE candidate
    async fn send_ice_candidate(
        &self,
        channel: &ChannelId,
        session_id: &SessionId,
        candidate: IceCandidate,
        recipient: Option<ParticipantId>,
    ) -> Result<()> {
        let mut envelope = SignalingEnvelope::new(
            channel.clone(),
            session_id.clone(),
            self.local_participant(),
            SignalingMessage::IceCandidate { candidate },
        );
        envelope.recipient = recipient;
        self.send(envelope).await
    }

    /// Ask whoever streams this channel to send us an offer
    async fn request_offer(&self, channel: &ChannelId, session_id: &SessionId) -> Result<()> {
        let envelope = SignalingEnvelope::new(
            channel.clone(),
            session_id.clone(),
            self.local_participant(),
            SignalingMessage::OfferRequest,
        );
        self.send(envelope).await
    }
}
