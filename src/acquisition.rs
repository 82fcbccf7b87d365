//! Frame intake: bounded queue with drop-newest back-pressure, plus a mock
//! camera for tests and dry runs.
//!
//! # Back-pressure policy
//!
//! Acquisition hardware delivers frames at an unbounded rate; the analysis
//! consumer may fall behind. The queue is bounded and **drops the newest
//! frame** when full rather than blocking the producer: stalling acquisition
//! hardware is never acceptable, and a stale microscopy frame carries no
//! information worth waiting for. Every drop is counted and observable via
//! [`QueueMetrics`].
//!
//! # Ordering
//!
//! Frames that are accepted are consumed in strict arrival (FIFO) order by
//! exactly one consumer; [`FrameReceiver`] is not cloneable, so the
//! single-consumer discipline is enforced by construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::MockCameraSettings;
use crate::core::{ImageFrame, PixelBuffer};

/// Counters shared between the producer side of the queue and observers.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Frames offered to the queue (accepted + dropped).
    received: AtomicU64,
    /// Frames dropped because the queue was full or closed.
    dropped: AtomicU64,
}

impl QueueMetrics {
    /// Frames offered to the queue so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Frames dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn count_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }
}

/// Creates a bounded frame queue of the given capacity.
///
/// Returns the producer handle, the consumer handle, and the shared metrics.
pub fn frame_channel(
    capacity: usize,
) -> (FrameSender, FrameReceiver, Arc<QueueMetrics>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let metrics = Arc::new(QueueMetrics::default());
    (
        FrameSender {
            tx,
            metrics: Arc::clone(&metrics),
        },
        FrameReceiver { rx },
        metrics,
    )
}

/// Producer handle of the frame queue.
///
/// Cheap to clone; the acquisition collaborator holds one and pushes each
/// frame as it arrives.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<ImageFrame>,
    metrics: Arc<QueueMetrics>,
}

impl FrameSender {
    /// Offers a frame to the queue.
    ///
    /// Returns `true` if the frame was accepted. On a full or closed queue
    /// the frame is dropped (newest-first policy), the drop counter
    /// incremented, and `false` returned. Never blocks.
    pub fn push(&self, frame: ImageFrame) -> bool {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Returns true once the consumer side has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Shared queue counters.
    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }
}

/// Consumer handle of the frame queue. Exactly one exists per queue.
pub struct FrameReceiver {
    rx: mpsc::Receiver<ImageFrame>,
}

impl FrameReceiver {
    /// Receives the next frame in arrival order; `None` once all senders
    /// are gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<ImageFrame> {
        self.rx.recv().await
    }

    /// Closes the intake, then counts and discards everything still queued.
    ///
    /// Used during teardown: queued frames are stale by definition once the
    /// loop is stopping. Returns the number of discarded frames.
    pub fn drain_and_close(&mut self) -> u64 {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

/// Synthetic frame producer for tests and dry runs.
///
/// Emits frames at a fixed rate whose mean brightness follows a slow
/// sinusoid with per-pixel noise, giving the analyzers a non-trivial signal
/// to track. Stops on its own once the consumer side of the queue is gone.
pub struct MockCamera {
    settings: MockCameraSettings,
}

impl MockCamera {
    /// Creates a mock camera with the given geometry and frame rate.
    pub fn new(settings: MockCameraSettings) -> Self {
        Self { settings }
    }

    /// Spawns the producer task, pushing frames into `sender` until the
    /// consumer disappears.
    pub fn spawn(self, sender: FrameSender) -> JoinHandle<()> {
        let s = self.settings;
        tokio::spawn(async move {
            info!(
                rate_hz = s.frame_rate_hz,
                width = s.width,
                height = s.height,
                "mock camera started"
            );
            let mut ticker = interval(Duration::from_secs_f64(1.0 / s.frame_rate_hz));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut rng = StdRng::seed_from_u64(s.seed);
            let start = tokio::time::Instant::now();
            let mut produced: u64 = 0;

            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }
                let t = start.elapsed().as_secs_f64();
                let base = 50.0 + 30.0 * (0.5 * t).sin();
                let count = (s.width * s.height) as usize;
                let mut pixels = Vec::with_capacity(count);
                for _ in 0..count {
                    let value = base + rng.gen_range(-10.0..10.0);
                    pixels.push(value.max(0.0) as u16);
                }
                let frame = ImageFrame {
                    width: s.width,
                    height: s.height,
                    pixel_size_um: s.pixel_size_um,
                    timestamp_ms: start.elapsed().as_millis() as u64,
                    pixels: PixelBuffer::U16(pixels),
                };
                sender.push(frame);
                produced += 1;
            }
            debug!(produced, "mock camera stopped");
        })
    }
}
