//! Paced sample sender
//!
//! Decouples the caller's send path from real-time transmission: encoded
//! samples go into a bounded queue and a background task writes them to the
//! WebRTC track one sample duration apart. A full queue is reported back as a
//! send error instead of growing latency.

use crate::{Error, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Encoded sample waiting for transmission
#[derive(Debug, Clone)]
struct QueuedSample {
    data: Bytes,
    duration: Duration,
}

/// Bounded queue plus pacing task in front of one sample track
#[derive(Debug)]
pub struct PacedSender {
    name: String,
    tx: mpsc::Sender<QueuedSample>,
    capacity: usize,
    sent: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl PacedSender {
    /// Spawn the pacing task for `track`
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs
    /// * `track` - Track samples are written to
    /// * `capacity` - Queue capacity in samples
    pub fn spawn(
        name: impl Into<String>,
        track: Arc<TrackLocalStaticSample>,
        capacity: usize,
    ) -> Self {
        let name = name.into();
        let capacity = capacity.max(1);
        let (tx, mut rx) = mpsc::channel::<QueuedSample>(capacity);
        let sent = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let task_name = name.clone();
        let task_sent = Arc::clone(&sent);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let queued = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    queued = rx.recv() => match queued {
                        Some(queued) => queued,
                        None => break,
                    },
                };

                let sample = Sample {
                    data: queued.data,
                    duration: queued.duration,
                    timestamp: std::time::SystemTime::now(),
                    ..Default::default()
                };

                if let Err(e) = track.write_sample(&sample).await {
                    warn!("{}: failed to write sample: {}", task_name, e);
                } else {
                    let count = task_sent.fetch_add(1, Ordering::AcqRel) + 1;
                    if count == 1 {
                        info!("{}: first sample sent", task_name);
                    } else if count % 500 == 0 {
                        debug!("{}: {} samples sent", task_name, count);
                    }
                }

                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(queued.duration) => {}
                }
            }
            debug!(
                "{}: pacing task stopped after {} samples",
                task_name,
                task_sent.load(Ordering::Acquire)
            );
        });

        Self {
            name,
            tx,
            capacity,
            sent,
            cancel,
        }
    }

    /// Queue an encoded sample; fails when the queue is full or stopped
    pub fn enqueue(&self, data: Bytes, duration: Duration) -> Result<()> {
        self.tx
            .try_send(QueuedSample { data, duration })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::TransportConnection(format!("{}: send queue full", self.name))
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::ChannelClosed(format!("{}: sender stopped", self.name))
                }
            })
    }

    /// Samples waiting in the queue
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Samples written to the track so far
    pub fn samples_sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// Stop the pacing task
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PacedSender {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
