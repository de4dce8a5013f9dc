//! Channel sessions: identities, public state machine and events
//!
//! A channel is an independently negotiated broadcast destination. Each channel
//! runs one [`channel::ChannelSession`] actor; the [`registry::ChannelRegistry`]
//! owns those actors and routes inbound relay messages to them.

pub mod channel;
pub mod registry;

use crate::media::TrackKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use registry::{ChannelRegistry, ChannelRegistryBuilder};

/// Logical broadcast channel (e.g. "StudioLive", "TVLive")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

/// One negotiation attempt for a channel, minted by the authority layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

/// Relay-connected participant (network client id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Create a new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(ChannelId);
string_id!(SessionId);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant-{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Public channel state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    /// No session; local capture is shown
    Idle,
    /// Negotiation in flight
    Connecting,
    /// Offerer role, at least one viewer established
    Streaming,
    /// Answerer role, established
    Receiving,
    /// Transient while tearing down
    Disconnecting,
    /// Retries exhausted or the media source was unusable
    Failed,
}

impl ChannelState {
    /// Connected in either direction
    pub fn is_established(&self) -> bool {
        matches!(self, ChannelState::Streaming | ChannelState::Receiving)
    }

    /// States in which a session is current
    pub fn has_session(&self) -> bool {
        matches!(
            self,
            ChannelState::Connecting | ChannelState::Streaming | ChannelState::Receiving
        )
    }
}

/// Negotiation role of the local participant on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Captured media is distributed from here; creates offers
    Offerer,
    /// Viewer; answers offers
    Answerer,
}

/// Why the application should fall back to its local capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFallbackReason {
    /// The channel was torn down and is Idle again
    Stopped,
    /// The session failed (retries exhausted or source unavailable)
    Failed,
}

/// Notifications published by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The public state machine moved
    StateChanged {
        /// Channel that changed
        channel: ChannelId,
        /// Session current after the transition (None once Idle)
        session_id: Option<SessionId>,
        /// State before the transition
        previous: ChannelState,
        /// State after the transition
        current: ChannelState,
    },
    /// Show the local captured source on this channel's display surface
    ShowLocal {
        /// Channel that fell back
        channel: ChannelId,
        /// Why it fell back
        reason: LocalFallbackReason,
    },
    /// A remote track arrived and was handed to the media sink
    TrackReceived {
        /// Channel the track belongs to
        channel: ChannelId,
        /// Participant who sent it
        participant: Option<ParticipantId>,
        /// Audio or video
        kind: TrackKind,
    },
}

impl ChannelEvent {
    /// Channel this event concerns
    pub fn channel(&self) -> &ChannelId {
        match self {
            ChannelEvent::StateChanged { channel, .. }
            | ChannelEvent::ShowLocal { channel, .. }
            | ChannelEvent::TrackReceived { channel, .. } => channel,
        }
    }
}

/// Point-in-time view of a channel session
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    /// Channel identity
    pub channel: ChannelId,
    /// Public state
    pub state: ChannelState,
    /// Current session (None when Idle)
    pub session_id: Option<SessionId>,
    /// Current role (None when Idle)
    pub role: Option<Role>,
    /// Automatic retries spent in the current failure episode
    pub retry_count: u32,
    /// Connection timeout the next attempt will use
    pub connection_timeout: Duration,
    /// Whether the last measured connect time was fast
    pub optimistic_state_enabled: bool,
    /// Live session connections (one per viewer in fan-out mode)
    pub connection_count: usize,
}
