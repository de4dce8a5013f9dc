//! Error types for the streaming session layer

/// Result type alias using the session layer Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running a channel session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SDP create/set failure (offer, answer, local or remote description)
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// ICE or connection-state failure reported by the transport engine
    #[error("Transport connection error: {0}")]
    TransportConnection(String),

    /// A single ICE candidate could not be applied
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Inbound message does not match channel, session or role
    #[error("Validation error: {0}")]
    Validation(String),

    /// Captured media source missing or unusable at session start
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Signaling relay could not deliver a message
    #[error("Relay error: {0}")]
    Relay(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Media encoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Channel actor or connection worker is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is handled by the channel's retry path
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_)
                | Error::TransportConnection(_)
                | Error::Relay(_)
                | Error::WebSocket(_)
        )
    }

    /// Check if this error ends a session without any retry
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(self, Error::ResourceUnavailable(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
