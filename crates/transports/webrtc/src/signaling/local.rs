//! In-process signaling relay
//!
//! Connects participants living in the same process (tests, loopback demos,
//! a host that embeds several studio screens). Answers are unicast; every
//! other message is broadcast to all endpoints, the sender included.

use super::{SignalingEnvelope, SignalingRelay};
use crate::session::ParticipantId;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct HubState {
    endpoints: HashMap<ParticipantId, mpsc::UnboundedSender<SignalingEnvelope>>,
}

/// Shared routing table for [`LocalRelay`] endpoints
#[derive(Debug, Clone, Default)]
pub struct LocalRelayHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalRelayHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant and return its endpoint
    ///
    /// Connecting the same participant twice replaces the earlier endpoint.
    pub fn connect(&self, participant: ParticipantId) -> LocalRelay {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().endpoints.insert(participant, tx);
        debug!("Local relay: {} connected", participant);

        LocalRelay {
            participant,
            hub: self.clone(),
            inbound: Mutex::new(Some(rx)),
        }
    }

    /// Remove a participant; messages addressed to it are dropped afterwards
    pub fn disconnect(&self, participant: ParticipantId) {
        if self.state.lock().endpoints.remove(&participant).is_some() {
            debug!("Local relay: {} disconnected", participant);
        }
    }

    /// Number of connected endpoints
    pub fn participant_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    fn deliver(&self, envelope: SignalingEnvelope) -> Result<usize> {
        let mut state = self.state.lock();

        if envelope.message.is_unicast() {
            let recipient = envelope.recipient.ok_or_else(|| {
                Error::Relay(format!("{} without recipient", envelope.message.kind()))
            })?;
            let endpoint = state
                .endpoints
                .get(&recipient)
                .ok_or_else(|| Error::Relay(format!("{} is not connected", recipient)))?;
            endpoint
                .send(envelope)
                .map_err(|_| Error::Relay(format!("{} endpoint closed", recipient)))?;
            return Ok(1);
        }

        let mut delivered = 0usize;
        state.endpoints.retain(|_, tx| match tx.send(envelope.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        Ok(delivered)
    }
}

/// One participant's endpoint on a [`LocalRelayHub`]
#[derive(Debug)]
pub struct LocalRelay {
    participant: ParticipantId,
    hub: LocalRelayHub,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<SignalingEnvelope>>>,
}

#[async_trait]
impl SignalingRelay for LocalRelay {
    fn local_participant(&self) -> ParticipantId {
        self.participant
    }

    async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        trace!(
            "Local relay: {} -> {:?} {} ({}/{})",
            envelope.sender,
            envelope.recipient,
            envelope.message.kind(),
            envelope.channel,
            envelope.session_id
        );
        self.hub.deliver(envelope).map(|_| ())
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<SignalingEnvelope>> {
        self.inbound.lock().take()
    }
}

impl Drop for LocalRelay {
    fn drop(&mut self) {
        self.hub.disconnect(self.participant);
    }
}
