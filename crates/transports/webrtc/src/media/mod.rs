//! Media boundary: captured source, remote sink and audio packetization

pub mod audio;
pub mod paced_sender;
pub mod packetizer;

use crate::session::{ChannelId, ParticipantId};
use crate::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use packetizer::{AudioInput, AudioPacketizer, TickReport};

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// Captured audio as produced by the source callback
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved samples (range -1.0 to 1.0)
    pub samples: Vec<f32>,
    /// Channel count the samples are interleaved with
    pub channels: u16,
}

impl AudioChunk {
    /// Create a chunk
    pub fn new(samples: Vec<f32>, channels: u16) -> Self {
        Self { samples, channels }
    }
}

/// One fixed-duration packet handed to the transport send path
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    /// Interleaved samples, exactly one packet's worth
    pub samples: Vec<f32>,
    /// Channel count
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioPacket {
    /// Duration represented by this packet
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as u64 / self.channels.max(1) as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

/// Opaque, already-encoded video frame pulled from the source
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Encoded payload
    pub data: Bytes,
    /// Display duration
    pub duration: Duration,
}

/// Description of a local track the source can feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    /// Audio or video
    pub kind: TrackKind,
    /// Track id
    pub id: String,
    /// Media stream id the track belongs to
    pub stream_id: String,
    /// Channel count (audio only)
    pub channels: u16,
}

impl LocalTrack {
    /// Audio track descriptor
    pub fn audio(id: impl Into<String>, stream_id: impl Into<String>, channels: u16) -> Self {
        Self {
            kind: TrackKind::Audio,
            id: id.into(),
            stream_id: stream_id.into(),
            channels,
        }
    }

    /// Video track descriptor
    pub fn video(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            kind: TrackKind::Video,
            id: id.into(),
            stream_id: stream_id.into(),
            channels: 0,
        }
    }
}

/// A track received from a remote participant
#[derive(Clone)]
pub struct RemoteTrack {
    /// Audio or video
    pub kind: TrackKind,
    /// Track id
    pub id: String,
    /// Media stream id
    pub stream_id: String,
    /// Engine-specific handle (e.g. `Arc<webrtc::track::track_remote::TrackRemote>`)
    pub handle: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

/// Captured media the offerer distributes
///
/// Shared read-only by every connection on the channel.
pub trait MediaSource: Send + Sync {
    /// Whether the device is present and producing
    fn is_available(&self) -> bool;

    /// Tracks to attach to each new connection
    fn local_tracks(&self) -> Vec<LocalTrack>;

    /// Latest video frame, if any (pull-based)
    fn current_frame(&self) -> Option<VideoFrame>;
}

/// Render/playback collaborator for received tracks
pub trait RemoteMediaSink: Send + Sync {
    /// A remote track arrived on `channel`
    fn on_track(
        &self,
        channel: &ChannelId,
        participant: Option<ParticipantId>,
        track: RemoteTrack,
    );
}

/// Transport send path used by the packetizer drain
pub trait AudioSink {
    /// Send one packet
    fn set_data(&self, samples: &[f32], channels: u16, sample_rate: u32) -> Result<()>;
}
