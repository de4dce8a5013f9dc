//! Signaling envelope wire format
//!
//! Every relay message is tagged with the channel, session and sender so the
//! receiving channel session can discard anything that is not addressed to
//! its current negotiation. The relay itself never inspects these fields.

use crate::session::{ChannelId, ParticipantId, SessionId};
use crate::transport::IceCandidate;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Signaling payloads exchanged between participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// SDP offer from the offerer
    Offer {
        /// Offer SDP
        sdp: String,
    },

    /// SDP answer from a viewer, unicast to the offerer
    Answer {
        /// Answer SDP
        sdp: String,
    },

    /// Trickled ICE candidate
    IceCandidate {
        /// Candidate descriptor
        candidate: IceCandidate,
    },

    /// A viewer asks the offerer to negotiate (late joiner pull)
    OfferRequest,
}

impl SignalingMessage {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice_candidate",
            SignalingMessage::OfferRequest => "offer_request",
        }
    }

    /// Whether the relay must deliver this message to the recipient only
    pub fn is_unicast(&self) -> bool {
        matches!(self, SignalingMessage::Answer { .. })
    }
}

/// A signaling message with its routing tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    /// Channel the negotiation belongs to
    pub channel: ChannelId,

    /// Session the negotiation belongs to
    pub session_id: SessionId,

    /// Participant that sent the message
    pub sender: ParticipantId,

    /// Intended recipient (required for answers, optional otherwise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ParticipantId>,

    /// Payload
    pub message: SignalingMessage,
}

impl SignalingEnvelope {
    /// Create a broadcast envelope
    pub fn new(
        channel: ChannelId,
        session_id: SessionId,
        sender: ParticipantId,
        message: SignalingMessage,
    ) -> Self {
        Self {
            channel,
            session_id,
            sender,
            recipient: None,
            message,
        }
    }

    /// Address the envelope to one participant
    pub fn to(mut self, recipient: ParticipantId) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Whether `participant` should act on this envelope
    ///
    /// Broadcast envelopes concern everyone; addressed envelopes concern only
    /// their recipient.
    pub fn is_addressed_to(&self, participant: ParticipantId) -> bool {
        self.recipient.map_or(true, |r| r == participant)
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
