//! Audio packetizer
//!
//! Reassembles variable-size captured chunks into fixed-duration packets.
//! The producer callback appends under the same lock the send tick drains
//! under, so the two may run on different threads. When the transport cannot
//! keep up, the oldest samples are dropped so buffered audio never represents
//! more than `max_buffered_duration_ms` of latency.

use super::{AudioChunk, AudioSink};
use crate::config::AudioConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct AssemblyBuffer {
    samples: VecDeque<f32>,
    last_channel_count: u16,
    dropped_samples: u64,
}

/// Outcome of one drain tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Packets handed to the sink
    pub packets_sent: usize,
    /// Whether the loop was cut short by a sink error
    pub aborted: bool,
}

/// Fixed-duration audio packetizer with drop-oldest overflow
#[derive(Debug)]
pub struct AudioPacketizer {
    sample_rate: u32,
    packet_duration_ms: u32,
    max_buffered_duration_ms: u32,
    buffer: Mutex<AssemblyBuffer>,
}

impl AudioPacketizer {
    /// Create a packetizer from audio settings
    pub fn new(config: &AudioConfig) -> Self {
        Self::with_params(
            config.sample_rate,
            config.packet_duration_ms,
            config.max_buffered_duration_ms,
        )
    }

    /// Create a packetizer from raw parameters
    pub fn with_params(
        sample_rate: u32,
        packet_duration_ms: u32,
        max_buffered_duration_ms: u32,
    ) -> Self {
        Self {
            sample_rate,
            packet_duration_ms,
            max_buffered_duration_ms,
            buffer: Mutex::new(AssemblyBuffer::default()),
        }
    }

    /// Sample rate packets are tagged with
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved samples per packet for `channels`
    pub fn samples_per_packet(&self, channels: u16) -> usize {
        samples_for(self.sample_rate, channels, self.packet_duration_ms)
    }

    /// Maximum interleaved samples retained for `channels`
    pub fn max_buffered_samples(&self, channels: u16) -> usize {
        samples_for(self.sample_rate, channels, self.max_buffered_duration_ms)
    }

    /// Producer callback: append one captured chunk
    ///
    /// A channel count change reinterprets everything already buffered under
    /// the new count; no remixing is done.
    pub fn on_chunk_produced(&self, chunk: &AudioChunk) {
        if chunk.channels == 0 {
            warn!("Ignoring audio chunk with zero channels");
            return;
        }

        let mut buffer = self.buffer.lock();
        if buffer.last_channel_count != 0 && buffer.last_channel_count != chunk.channels {
            warn!(
                "Audio channel count changed {} -> {}; buffered samples reinterpreted",
                buffer.last_channel_count, chunk.channels
            );
        }
        buffer.last_channel_count = chunk.channels;
        buffer.samples.extend(chunk.samples.iter().copied());

        let limit = self.max_buffered_samples(chunk.channels);
        trim_front(&mut buffer, limit);
    }

    /// Consumer tick: drain every whole packet into `sink`
    ///
    /// The first sink error aborts the remaining sends for this tick; the
    /// packet that failed is not retried.
    pub fn tick(&self, sink: &dyn AudioSink) -> TickReport {
        let mut buffer = self.buffer.lock();
        let channels = buffer.last_channel_count;
        let mut report = TickReport::default();
        if channels == 0 {
            return report;
        }

        let per_packet = self.samples_per_packet(channels);
        if per_packet == 0 {
            return report;
        }

        while buffer.samples.len() >= per_packet {
            let packet: Vec<f32> = buffer.samples.drain(..per_packet).collect();
            if let Err(e) = sink.set_data(&packet, channels, self.sample_rate) {
                warn!("Audio send failed, aborting tick: {}", e);
                report.aborted = true;
                break;
            }
            report.packets_sent += 1;
        }

        let limit = self.max_buffered_samples(channels);
        trim_front(&mut buffer, limit);

        trace!(
            "Audio tick: sent {} packets, {} samples buffered",
            report.packets_sent,
            buffer.samples.len()
        );
        report
    }

    /// Samples currently waiting in the assembly buffer
    pub fn buffered_samples(&self) -> usize {
        self.buffer.lock().samples.len()
    }

    /// Channel count of the most recent chunk (0 before the first one)
    pub fn last_channel_count(&self) -> u16 {
        self.buffer.lock().last_channel_count
    }

    /// Total samples discarded by the overflow policy
    pub fn dropped_samples(&self) -> u64 {
        self.buffer.lock().dropped_samples
    }

    /// Discard buffered audio
    pub fn clear(&self) {
        let mut buffer = self.buffer.lock();
        buffer.samples.clear();
    }
}

fn samples_for(sample_rate: u32, channels: u16, duration_ms: u32) -> usize {
    (sample_rate as u64 * channels as u64 * duration_ms as u64 / 1000) as usize
}

fn trim_front(buffer: &mut AssemblyBuffer, limit: usize) {
    let excess = buffer.samples.len().saturating_sub(limit);
    if excess > 0 {
        buffer.samples.drain(..excess);
        buffer.dropped_samples += excess as u64;
        trace!("Audio overflow: dropped {} oldest samples", excess);
    }
}

/// Cloneable producer handle onto a channel's packetizer
///
/// Hand this to the capture callback; it only ever appends.
#[derive(Debug, Clone)]
pub struct AudioInput {
    packetizer: Arc<AudioPacketizer>,
}

impl AudioInput {
    pub(crate) fn new(packetizer: Arc<AudioPacketizer>) -> Self {
        Self { packetizer }
    }

    /// Append interleaved samples
    pub fn push(&self, samples: Vec<f32>, channels: u16) {
        self.packetizer
            .on_chunk_produced(&AudioChunk::new(samples, channels));
    }

    /// Append a prepared chunk
    pub fn push_chunk(&self, chunk: &AudioChunk) {
        self.packetizer.on_chunk_produced(chunk);
    }

    /// Samples waiting to be packetized
    pub fn buffered_samples(&self) -> usize {
        self.packetizer.buffered_samples()
    }
}
