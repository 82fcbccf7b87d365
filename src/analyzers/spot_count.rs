//! Threshold-based spot density analyzer.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::core::{Analyzer, AnalyzerStatus, ImageFrame, Roi};
use crate::error::AppResult;

/// Registry name of the spot counter analyzer.
pub const NAME: &str = "spot-count";

/// Default intensity threshold above which a pixel counts as part of a spot.
const DEFAULT_THRESHOLD: f64 = 100.0;

#[derive(Debug, Default)]
struct State {
    roi: Option<Roi>,
    last_density: f64,
    batch_sum: f64,
    batch_count: u64,
    frames_analyzed: u64,
}

/// Estimates fluorophore density by counting above-threshold pixels.
///
/// The per-frame signal is the number of pixels above `threshold` within
/// the ROI, divided by the ROI area in µm². The intermittent output is the
/// most recent density; the batch output is the mean density since the last
/// batch read, or `None` when no frame arrived in between. A mean (rather
/// than a sum) keeps the control signal independent of the ratio between
/// frame rate and control period.
pub struct SpotCounter {
    threshold: f64,
    state: Mutex<State>,
}

impl SpotCounter {
    /// Creates a spot counter with the given intensity threshold.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            state: Mutex::new(State::default()),
        }
    }

    /// Builds a spot counter from a TOML parameter table.
    ///
    /// Recognized parameters: `threshold` (float, default 100.0).
    pub fn from_params(params: &toml::Value) -> Self {
        let threshold = params
            .get("threshold")
            .and_then(toml::Value::as_float)
            .unwrap_or(DEFAULT_THRESHOLD);
        Self::new(threshold)
    }

    fn locked(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Analyzer for SpotCounter {
    fn name(&self) -> &str {
        NAME
    }

    fn short_description(&self) -> &str {
        "spot density [1/um^2]"
    }

    fn process_frame(&self, frame: &ImageFrame) -> AppResult<()> {
        let roi = frame.resolve_roi(self.locked().roi);

        let mut hits: u64 = 0;
        for y in roi.y..roi.y + roi.height {
            for x in roi.x..roi.x + roi.width {
                if frame.pixel(x, y) > self.threshold {
                    hits += 1;
                }
            }
        }
        let area_um2 =
            roi.area_px() as f64 * frame.pixel_size_um * frame.pixel_size_um;
        let density = if area_um2 > 0.0 {
            hits as f64 / area_um2
        } else {
            0.0
        };

        let mut state = self.locked();
        state.last_density = density;
        state.batch_sum += density;
        state.batch_count += 1;
        state.frames_analyzed += 1;
        trace!(t_ms = frame.timestamp_ms, hits, density, "spot-count frame");
        Ok(())
    }

    fn intermittent_output(&self) -> f64 {
        self.locked().last_density
    }

    fn batch_output(&self) -> Option<f64> {
        let mut state = self.locked();
        if state.batch_count == 0 {
            return None;
        }
        let mean = state.batch_sum / state.batch_count as f64;
        state.batch_sum = 0.0;
        state.batch_count = 0;
        Some(mean)
    }

    fn set_roi(&self, roi: Option<Roi>) {
        self.locked().roi = roi;
    }

    fn status(&self) -> Option<AnalyzerStatus> {
        let state = self.locked();
        Some(AnalyzerStatus {
            name: NAME.to_string(),
            frames_analyzed: state.frames_analyzed,
            intermittent_output: state.last_density,
        })
    }
}
