//! Integrating mean-intensity analyzer.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::core::{Analyzer, AnalyzerStatus, ImageFrame, Roi};
use crate::error::AppResult;

/// Registry name of the integrator analyzer.
pub const NAME: &str = "integrator";

#[derive(Debug, Default)]
struct State {
    roi: Option<Roi>,
    last_value: f64,
    batch_sum: f64,
    batch_count: u64,
    frames_analyzed: u64,
}

/// Accumulates the mean pixel intensity of each frame.
///
/// The per-frame signal is the mean intensity over the ROI, multiplied by a
/// configurable `scale`. The intermittent output is the most recent
/// per-frame signal; the batch output is the sum of per-frame signals since
/// the last batch read, or `None` when no frame arrived in between.
pub struct Integrator {
    scale: f64,
    state: Mutex<State>,
}

impl Integrator {
    /// Creates an integrator with the given per-frame scale factor.
    pub fn new(scale: f64) -> Self {
        Self {
            scale,
            state: Mutex::new(State::default()),
        }
    }

    /// Builds an integrator from a TOML parameter table.
    ///
    /// Recognized parameters: `scale` (float, default 1.0).
    pub fn from_params(params: &toml::Value) -> Self {
        let scale = params
            .get("scale")
            .and_then(toml::Value::as_float)
            .unwrap_or(1.0);
        Self::new(scale)
    }

    fn locked(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Analyzer for Integrator {
    fn name(&self) -> &str {
        NAME
    }

    fn short_description(&self) -> &str {
        "integrated mean intensity [counts]"
    }

    fn process_frame(&self, frame: &ImageFrame) -> AppResult<()> {
        // Read the ROI in a short critical section, scan outside of it.
        let roi = frame.resolve_roi(self.locked().roi);

        let mut sum = 0.0;
        for y in roi.y..roi.y + roi.height {
            for x in roi.x..roi.x + roi.width {
                sum += frame.pixel(x, y);
            }
        }
        let area = roi.area_px();
        // A degenerate frame resolves to a zero-area ROI; 0.0/0.0 would
        // poison the batch sum with NaN.
        let value = if area > 0 {
            self.scale * sum / area as f64
        } else {
            0.0
        };

        let mut state = self.locked();
        state.last_value = value;
        state.batch_sum += value;
        state.batch_count += 1;
        state.frames_analyzed += 1;
        trace!(
            t_ms = frame.timestamp_ms,
            value,
            pending = state.batch_count,
            "integrator frame"
        );
        Ok(())
    }

    fn intermittent_output(&self) -> f64 {
        self.locked().last_value
    }

    fn batch_output(&self) -> Option<f64> {
        let mut state = self.locked();
        if state.batch_count == 0 {
            return None;
        }
        let sum = state.batch_sum;
        state.batch_sum = 0.0;
        state.batch_count = 0;
        Some(sum)
    }

    fn set_roi(&self, roi: Option<Roi>) {
        self.locked().roi = roi;
    }

    fn status(&self) -> Option<AnalyzerStatus> {
        let state = self.locked();
        Some(AnalyzerStatus {
            name: NAME.to_string(),
            frames_analyzed: state.frames_analyzed,
            intermittent_output: state.last_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PixelBuffer;

    fn uniform_frame(fill: f64, t_ms: u64) -> ImageFrame {
        ImageFrame {
            width: 8,
            height: 8,
            pixel_size_um: 0.1,
            timestamp_ms: t_ms,
            pixels: PixelBuffer::F64(vec![fill; 64]),
        }
    }

    #[test]
    fn test_batch_accumulates_then_resets() {
        let analyzer = Integrator::new(1.0);
        for t in 0..3 {
            analyzer
                .process_frame(&uniform_frame(1.0, t))
                .expect("process");
        }
        // Three frames of mean 1.0 accumulate to 3.0, read out exactly once.
        assert_eq!(analyzer.batch_output(), Some(3.0));
        assert_eq!(analyzer.batch_output(), None);
    }

    #[test]
    fn test_batch_is_none_before_first_frame() {
        let analyzer = Integrator::new(1.0);
        assert_eq!(analyzer.batch_output(), None);
    }

    #[test]
    fn test_intermittent_is_idempotent() {
        let analyzer = Integrator::new(1.0);
        analyzer
            .process_frame(&uniform_frame(2.5, 0))
            .expect("process");
        let first = analyzer.intermittent_output();
        let second = analyzer.intermittent_output();
        assert_eq!(first, 2.5);
        assert_eq!(first, second);
        // Intermittent reads never consume the batch accumulation.
        assert_eq!(analyzer.batch_output(), Some(2.5));
    }

    #[test]
    fn test_roi_constrains_mean() {
        let mut pixels = vec![0.0; 64];
        // Bright 2x2 block at (0, 0).
        pixels[0] = 8.0;
        pixels[1] = 8.0;
        pixels[8] = 8.0;
        pixels[9] = 8.0;
        let frame = ImageFrame {
            width: 8,
            height: 8,
            pixel_size_um: 0.1,
            timestamp_ms: 0,
            pixels: PixelBuffer::F64(pixels),
        };

        let analyzer = Integrator::new(1.0);
        analyzer.set_roi(Some(Roi { x: 0, y: 0, width: 2, height: 2 }));
        analyzer.process_frame(&frame).expect("process");
        assert_eq!(analyzer.intermittent_output(), 8.0);

        analyzer.set_roi(None);
        analyzer.process_frame(&frame).expect("process");
        assert_eq!(analyzer.intermittent_output(), 0.5);
    }

    #[test]
    fn test_zero_area_frame_does_not_poison_batch() {
        let empty = ImageFrame {
            width: 0,
            height: 0,
            pixel_size_um: 0.1,
            timestamp_ms: 0,
            pixels: PixelBuffer::F64(Vec::new()),
        };
        let analyzer = Integrator::new(1.0);
        analyzer.process_frame(&empty).expect("process");
        assert_eq!(analyzer.intermittent_output(), 0.0);
        // Later valid frames in the same batch window stay observable.
        analyzer
            .process_frame(&uniform_frame(1.0, 1))
            .expect("process");
        assert_eq!(analyzer.batch_output(), Some(1.0));
    }

    #[test]
    fn test_scale_parameter() {
        let params: toml::Value = toml::from_str("scale = 2.0").expect("toml");
        let analyzer = Integrator::from_params(&params);
        analyzer
            .process_frame(&uniform_frame(1.5, 0))
            .expect("process");
        assert_eq!(analyzer.intermittent_output(), 3.0);
    }

    #[test]
    fn test_status_reports_frame_count() {
        let analyzer = Integrator::new(1.0);
        analyzer
            .process_frame(&uniform_frame(1.0, 0))
            .expect("process");
        let status = analyzer.status().expect("status");
        assert_eq!(status.name, NAME);
        assert_eq!(status.frames_analyzed, 1);
        assert_eq!(status.intermittent_output, 1.0);
    }
}
