//! Core traits and data types for the illumination control loop.
//!
//! This module defines the foundational abstractions of the crate: the image
//! frame and ROI data types, the loop state machine, and the trait-based
//! interfaces every pluggable analyzer, controller, and actuator implements.
//!
//! # Architecture Overview
//!
//! - [`Analyzer`]: reduces an image stream to a scalar signal (e.g., an
//!   estimated fluorophore density) with two read channels: intermittent
//!   (monitoring) and batch (control-feeding).
//! - [`Controller`]: turns a process-variable sample plus a setpoint into an
//!   actuation output (e.g., a laser power).
//! - [`Actuator`]: receives the actuation output, fire-and-forget.
//!
//! # Data Flow
//!
//! ```text
//! acquisition --[ImageFrame]--> frame queue --> Analyzer::process_frame
//!                                                     |
//!                   [periodic]  Analyzer::batch_output --> Controller::next_value
//!                                                     |
//!                                       Controller::current_output --> Actuator
//! ```
//!
//! # Thread Safety
//!
//! All traits require `Send + Sync` and take `&self`: the active analyzer is
//! shared between exactly one writer (the frame consumer task) and any
//! number of readers (control task, monitoring pollers), so implementations
//! guard their state with an internal mutex. Writer-vs-writer exclusion is
//! guaranteed externally by the single-consumer rule and is not something an
//! implementation needs to arrange for itself. Releasing the internal lock
//! at the end of `process_frame` is the visibility boundary: a batch sample
//! taken afterwards reflects every frame consumed strictly before it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppResult;

// =============================================================================
// Image Data Types
// =============================================================================

/// Memory-efficient pixel buffer supporting multiple bit depths.
///
/// `PixelBuffer` stores image data in its native format to avoid unnecessary
/// type conversions and memory bloat. Camera sensors typically output 8-bit
/// or 16-bit unsigned integers; `F64` exists for computed images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PixelBuffer {
    /// 8-bit unsigned integer pixels (1 byte/pixel)
    U8(Vec<u8>),
    /// 16-bit unsigned integer pixels (2 bytes/pixel)
    U16(Vec<u16>),
    /// 64-bit floating point pixels (8 bytes/pixel)
    F64(Vec<f64>),
}

impl PixelBuffer {
    /// Returns the number of pixels in the buffer.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(data) => data.len(),
            PixelBuffer::U16(data) => data.len(),
            PixelBuffer::F64(data) => data.len(),
        }
    }

    /// Returns true if the buffer contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the pixel at a flat index as f64, or 0.0 past the end.
    pub fn value_at(&self, index: usize) -> f64 {
        match self {
            PixelBuffer::U8(data) => data.get(index).copied().map_or(0.0, f64::from),
            PixelBuffer::U16(data) => data.get(index).copied().map_or(0.0, f64::from),
            PixelBuffer::F64(data) => data.get(index).copied().unwrap_or(0.0),
        }
    }

    /// Returns the memory size in bytes.
    pub fn memory_bytes(&self) -> usize {
        match self {
            PixelBuffer::U8(data) => data.len(),
            PixelBuffer::U16(data) => data.len() * 2,
            PixelBuffer::F64(data) => data.len() * 8,
        }
    }
}

/// Region of interest constraining analysis to a sub-rectangle of the frame.
///
/// Set on an analyzer at configuration time and read by it on each
/// `process_frame` call. An ROI that extends past the frame is clamped to
/// the frame bounds rather than rejected.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roi {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Roi {
    /// Clamps this ROI to an image of the given dimensions.
    ///
    /// Returns `None` when the intersection is empty (ROI entirely outside
    /// the frame, or zero-sized).
    pub fn clamped_to(&self, image_width: u32, image_height: u32) -> Option<Roi> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Roi {
            x: self.x,
            y: self.y,
            width,
            height,
        })
    }

    /// ROI area in pixels.
    pub fn area_px(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A single acquired image frame.
///
/// Immutable once produced. Ownership moves from the acquisition producer
/// into the frame queue and on to the consuming `process_frame` call; an
/// analyzer receives a borrow and must copy anything it wants to retain
/// beyond that call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Length of one pixel side in micrometers.
    pub pixel_size_um: f64,
    /// Acquisition time in milliseconds; monotonically non-decreasing
    /// across a producer's frames.
    pub timestamp_ms: u64,
    /// Raw pixel data in row-major order.
    pub pixels: PixelBuffer,
}

impl ImageFrame {
    /// Returns the pixel at (x, y) as f64, or 0.0 outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> f64 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.pixels
            .value_at(y as usize * self.width as usize + x as usize)
    }

    /// Returns the total number of pixels (width × height).
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Resolves an optional ROI against this frame.
    ///
    /// `None`, an empty intersection, or a degenerate ROI all fall back to
    /// the full frame.
    pub fn resolve_roi(&self, roi: Option<Roi>) -> Roi {
        roi.and_then(|r| r.clamped_to(self.width, self.height))
            .unwrap_or(Roi {
                x: 0,
                y: 0,
                width: self.width,
                height: self.height,
            })
    }
}

// =============================================================================
// Loop State
// =============================================================================

/// Control loop lifecycle state.
///
/// Transitions: `Idle → Running → Stopping → Idle`. Selection changes on
/// either registry are only permitted in `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    /// No active analyzer/controller bound.
    Idle,
    /// Producer, consumer, and control-evaluation tasks are live.
    Running,
    /// Cooperative teardown in progress; in-flight work completes.
    Stopping,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Running => write!(f, "Running"),
            LoopState::Stopping => write!(f, "Stopping"),
        }
    }
}

// =============================================================================
// Status Projections
// =============================================================================

/// Read-only analyzer snapshot for the monitoring collaborator.
///
/// Replaces the status-panel hook of the source contract: pure data, no
/// behavioral coupling to the loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerStatus {
    /// Analyzer name.
    pub name: String,
    /// Frames analyzed since construction.
    pub frames_analyzed: u64,
    /// Most recent intermittent output.
    pub intermittent_output: f64,
}

/// Read-only controller snapshot for the monitoring collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Controller name.
    pub name: String,
    /// Current setpoint.
    pub setpoint: f64,
    /// Last computed actuation output.
    pub output: f64,
}

// =============================================================================
// Analyzer Trait
// =============================================================================

/// Reduces an image stream to a scalar signal.
///
/// An analyzer receives frames, processes them, and adjusts its internal
/// state (and output) accordingly. The loop can request the output at any
/// time, through two distinct channels:
///
/// - [`intermittent_output`](Analyzer::intermittent_output): non-destructive
///   monitoring read; never mutates state.
/// - [`batch_output`](Analyzer::batch_output): destructive read feeding the
///   controller; consumes the accumulation since the previous batch read.
///
/// # Concurrency contract
///
/// `process_frame` is called from exactly one task at a time (the loop's
/// single-consumer rule); the read methods may be called concurrently from
/// any task. Implementations therefore guard state shared between
/// `process_frame` and the read methods with an internal mutex, keeping
/// every critical section bounded so monitoring reads cannot stall the
/// acquisition path.
pub trait Analyzer: Send + Sync {
    /// Stable, unique analyzer name.
    fn name(&self) -> &str;

    /// A short string describing the analyzer's return values, for display
    /// next to plotted output.
    fn short_description(&self) -> &str;

    /// Processes the next frame and adjusts internal state.
    ///
    /// Runs on the hot acquisition-consumer path; keep analysis time as
    /// short as possible. The current ROI, if any, constrains which pixels
    /// are considered. Errors are caught at the orchestrator boundary: the
    /// frame's effect is dropped and the loop keeps running.
    fn process_frame(&self, frame: &ImageFrame) -> AppResult<()>;

    /// Non-destructive snapshot of the analyzer's current signal.
    ///
    /// Safe to call at any time from any task; two calls with no
    /// intervening `process_frame` return the same value.
    fn intermittent_output(&self) -> f64;

    /// Destructive read of the accumulation since the last batch read.
    ///
    /// Returns `None` when no new sample exists — the `NaN` sentinel of the
    /// source contract expressed as a sum type. This is the sole channel
    /// feeding the controller.
    fn batch_output(&self) -> Option<f64>;

    /// Constrains analysis of subsequent frames to `roi`; `None` restores
    /// full-frame analysis.
    fn set_roi(&self, roi: Option<Roi>);

    /// Read-only status projection, or `None` if the analyzer does not
    /// publish one.
    fn status(&self) -> Option<AnalyzerStatus> {
        None
    }

    /// Releases any resources owned by this analyzer.
    ///
    /// Called exactly once by the orchestrator when the loop stops or the
    /// selection changes. Best-effort: failures are logged, never fatal to
    /// teardown.
    fn dispose(&self) -> AppResult<()> {
        Ok(())
    }
}

// =============================================================================
// Controller Trait
// =============================================================================

/// Computes an actuation output from a process-variable sample and setpoint.
///
/// A controller receives the analyzer's batch output as input and adjusts
/// its internal state accordingly. It can be asked for its output at any
/// time.
///
/// # Concurrency contract
///
/// `next_value` is called from exactly one task (the control-evaluation
/// task), but `set_setpoint` may arrive concurrently from a configuration
/// path. Implementations guard setpoint and accumulators together with an
/// internal mutex so the two can interleave without tearing state.
pub trait Controller: Send + Sync {
    /// Stable, unique controller name.
    fn name(&self) -> &str;

    /// Replaces the desired process-variable target; takes effect on the
    /// next `next_value` call.
    fn set_setpoint(&self, setpoint: f64);

    /// Current setpoint value.
    fn setpoint(&self) -> f64;

    /// Consumes one process-variable sample and returns the updated output.
    ///
    /// A `None` sample means the analyzer produced nothing this cycle; it
    /// must leave internal accumulators untouched and return the previous
    /// output unchanged, degrading gracefully to "hold last output".
    fn next_value(&self, sample: Option<f64>) -> f64;

    /// Idempotent read of the last computed actuation output; never
    /// recomputes or mutates state.
    fn current_output(&self) -> f64;

    /// Read-only status projection, or `None` if the controller does not
    /// publish one.
    fn status(&self) -> Option<ControllerStatus> {
        None
    }
}

// =============================================================================
// Actuator Trait
// =============================================================================

/// Receives the controller's output on each control-evaluation cycle.
///
/// Fire-and-forget from the loop's point of view: implementations must not
/// block the control-evaluation task for unbounded time, and failures are
/// logged rather than propagated into the loop.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Actuator name, for logging.
    fn name(&self) -> &str;

    /// Applies one actuation value (e.g., a laser power in milliwatts).
    async fn set_output(&self, value: f64) -> AppResult<()>;
}
