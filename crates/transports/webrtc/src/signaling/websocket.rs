//! WebSocket signaling relay
//!
//! Envelopes travel as JSON text frames to a broadcast server that forwards
//! every frame to every connected participant. Unicast is best-effort on the
//! server side; receivers drop envelopes addressed to someone else anyway.

use super::{SignalingEnvelope, SignalingRelay};
use crate::session::ParticipantId;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Signaling relay over a WebSocket connection
pub struct WebSocketRelay {
    participant: ParticipantId,
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<SignalingEnvelope>>>,
}

impl WebSocketRelay {
    /// Connect to the relay server
    ///
    /// Spawns a writer task draining outgoing frames and a reader task that
    /// parses inbound frames into envelopes.
    ///
    /// # Arguments
    ///
    /// * `url` - Relay server URL (ws:// or wss://)
    /// * `participant` - Local participant id stamped on outgoing envelopes
    pub async fn connect(url: &str, participant: ParticipantId) -> Result<Self> {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay URL must start with ws:// or wss://, got {}",
                url
            )));
        }

        info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling relay as {}", participant);

        let (mut write, mut read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    error!("Failed to send relay frame: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Relay writer task terminated");
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalingEnvelope::from_json(&text) {
                        Ok(envelope) => {
                            if inbound_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Skipping malformed relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Relay connection closed by server");
                        break;
                    }
                    Err(e) => {
                        error!("Relay connection error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            debug!("Relay reader task terminated");
        });

        Ok(Self {
            participant,
            url: url.to_string(),
            outgoing,
            inbound: Mutex::new(Some(inbound_rx)),
        })
    }

    /// Relay server URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the writer task is still running
    pub fn is_connected(&self) -> bool {
        !self.outgoing.is_closed()
    }
}

#[async_trait]
impl SignalingRelay for WebSocketRelay {
    fn local_participant(&self) -> ParticipantId {
        self.participant
    }

    async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        let json = envelope.to_json()?;
        self.outgoing
            .send(Message::Text(json))
            .map_err(|_| Error::Relay(format!("relay connection to {} is closed", self.url)))
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<SignalingEnvelope>> {
        self.inbound.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_websocket_url() {
        let result = WebSocketRelay::connect("http://localhost:1", ParticipantId(1)).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_connect_refused_is_websocket_error() {
        // Port 1 is reserved; nothing listens there.
        let result = WebSocketRelay::connect("ws://127.0.0.1:1", ParticipantId(1)).await;
        assert!(matches!(result, Err(Error::WebSocket(_))));
    }
}
