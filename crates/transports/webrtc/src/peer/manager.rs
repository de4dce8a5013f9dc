//! Per-channel set of session connections
//!
//! In fan-out offerer mode there is one connection per viewer, keyed by the
//! viewer's participant id. Otherwise there is at most one connection, keyed
//! by `None`, whose remote participant is learned from the first offer or
//! answer.

use super::connection::{ConnectionId, SessionConnection};
use crate::session::ParticipantId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::debug;

/// Map key: the viewer in fan-out mode, `None` for the single connection
pub type ConnectionKey = Option<ParticipantId>;

/// A connection plus what the channel knows about it
#[derive(Debug)]
pub struct ConnectionEntry {
    /// The connection handle
    pub connection: SessionConnection,
    /// Remote participant, once known
    pub remote: Option<ParticipantId>,
    /// Remote answer received (offerer side)
    pub answered: bool,
    /// Remote offer accepted (answerer side)
    pub offered: bool,
    /// SDP of the accepted remote offer
    pub offer_sdp: Option<String>,
    /// Engine reported Connected
    pub established: bool,
    /// When negotiation on this connection began
    pub started_at: Instant,
}

impl ConnectionEntry {
    /// Wrap a freshly spawned connection
    pub fn new(connection: SessionConnection, remote: Option<ParticipantId>) -> Self {
        Self {
            connection,
            remote,
            answered: false,
            offered: false,
            offer_sdp: None,
            established: false,
            started_at: Instant::now(),
        }
    }
}

/// Connections owned by one channel session
#[derive(Debug, Default)]
pub struct ConnectionSet {
    entries: HashMap<ConnectionKey, ConnectionEntry>,
}

impl ConnectionSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection, disposing any previous one under the same key
    pub fn insert(&mut self, key: ConnectionKey, entry: ConnectionEntry) -> &mut ConnectionEntry {
        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(entry);
                debug!(
                    "Replacing connection {} for {:?}",
                    previous.connection.id(),
                    key
                );
                previous.connection.dispose();
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(entry),
        }
    }

    /// Entry under `key`
    pub fn get(&self, key: &ConnectionKey) -> Option<&ConnectionEntry> {
        self.entries.get(key)
    }

    /// Mutable entry under `key`
    pub fn get_mut(&mut self, key: &ConnectionKey) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(key)
    }

    /// Key of the live connection with instance id `id`
    pub fn key_of(&self, id: ConnectionId) -> Option<ConnectionKey> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.connection.id() == id)
            .map(|(key, _)| *key)
    }

    /// Dispose and remove the connection under `key`
    pub fn remove(&mut self, key: &ConnectionKey) -> Option<ConnectionEntry> {
        let entry = self.entries.remove(key)?;
        entry.connection.dispose();
        Some(entry)
    }

    /// Dispose and remove every connection
    pub fn dispose_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.connection.dispose();
        }
        count
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no connections
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Established connections other than `except`
    pub fn established_excluding(&self, except: Option<&ConnectionKey>) -> usize {
        self.entries
            .iter()
            .filter(|(key, entry)| entry.established && Some(*key) != except)
            .count()
    }

    /// Connections media may be sent on
    pub fn established(&self) -> impl Iterator<Item = &SessionConnection> {
        self.entries
            .values()
            .filter(|entry| entry.established)
            .map(|entry| &entry.connection)
    }
}

impl Drop for ConnectionSet {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioPacket, LocalTrack, VideoFrame};
    use crate::peer::connection::ConnectionNotice;
    use crate::transport::{
        IceCandidate, PeerTransport, SessionDescription, TransportEventSender, TransportFactory,
    };
    use crate::Result;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct NullTransport;

    #[async_trait]
    impl PeerTransport for NullTransport {
        async fn create_offer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::offer(""))
        }
        async fn create_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::answer(""))
        }
        async fn set_local_description(&self, _d: SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(&self, _d: SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _c: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn add_track(&self, _t: &LocalTrack) -> Result<()> {
            Ok(())
        }
        async fn remove_track(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        fn send_audio(&self, _p: &AudioPacket) -> Result<()> {
            Ok(())
        }
        fn send_video(&self, _f: &VideoFrame) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NullFactory;

    #[async_trait]
    impl TransportFactory for NullFactory {
        async fn create(&self, _events: TransportEventSender) -> Result<Arc<dyn PeerTransport>> {
            Ok(Arc::new(NullTransport))
        }
    }

    fn spawn(tx: &mpsc::UnboundedSender<ConnectionNotice>) -> SessionConnection {
        SessionConnection::spawn(Arc::new(NullFactory), vec![], tx.clone())
    }

    #[tokio::test]
    async fn test_insert_replaces_and_disposes() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut set = ConnectionSet::new();
        let viewer = Some(ParticipantId(2));

        let first = spawn(&tx);
        let first_id = first.id();
        set.insert(viewer, ConnectionEntry::new(first, viewer));
        set.insert(viewer, ConnectionEntry::new(spawn(&tx), viewer));

        assert_eq!(set.len(), 1);
        assert!(set.key_of(first_id).is_none());
    }

    #[tokio::test]
    async fn test_established_accounting() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut set = ConnectionSet::new();
        let b = Some(ParticipantId(2));
        let c = Some(ParticipantId(3));

        set.insert(b, ConnectionEntry::new(spawn(&tx), b));
        set.insert(c, ConnectionEntry::new(spawn(&tx), c));
        set.get_mut(&b).unwrap().established = true;

        assert_eq!(set.established().count(), 1);
        assert_eq!(set.established_excluding(Some(&b)), 0);
        assert_eq!(set.established_excluding(Some(&c)), 1);
    }

    #[tokio::test]
    async fn test_remove_and_dispose_all() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut set = ConnectionSet::new();
        let b = Some(ParticipantId(2));

        set.insert(b, ConnectionEntry::new(spawn(&tx), b));
        set.insert(None, ConnectionEntry::new(spawn(&tx), None));

        let removed = set.remove(&b).unwrap();
        assert!(removed.connection.is_disposed());
        assert_eq!(set.dispose_all(), 1);
        assert!(set.is_empty());
    }
}
