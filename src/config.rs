//! Application configuration.
//!
//! Settings are layered with figment: compiled-in defaults, then an
//! optional TOML file, then `ILLUMCTL_`-prefixed environment variables
//! (nested keys separated by `__`, e.g. `ILLUMCTL_PIPELINE__SETPOINT=2.5`).
//! Parsing and semantic validation are separate steps: figment errors
//! surface as [`ControlError::Config`], logically invalid values as
//! [`ControlError::Configuration`].
//!
//! The `[analyzer]` and `[controller]` tables are free-form: they are handed
//! verbatim to whichever factory is selected, so registered plugins define
//! their own parameter vocabulary without this module knowing it.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ControlError};
use crate::orchestrator::LoopConfig;

/// Pipeline (orchestrator) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Frame queue capacity; the newest frame is dropped beyond it.
    pub queue_capacity: usize,
    /// Control-evaluation period (e.g. "500ms", "2s").
    #[serde(with = "humantime_serde")]
    pub control_period: Duration,
    /// Initial process-variable setpoint.
    pub setpoint: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            control_period: Duration::from_millis(500),
            setpoint: 1.0,
        }
    }
}

/// Actuator output shaping settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActuatorSettings {
    /// Hard output ceiling (physical units of the actuator).
    pub max_output: f64,
    /// Relative dead-zone fraction; changes smaller than this are not
    /// forwarded to the hardware. 0.0 disables the dead-zone.
    pub deadzone: f64,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            max_output: 100.0,
            deadzone: 0.0,
        }
    }
}

/// Mock camera geometry and rate, for tests and dry runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MockCameraSettings {
    /// Frame rate in Hz.
    pub frame_rate_hz: f64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel side length in micrometers.
    pub pixel_size_um: f64,
    /// Noise seed, for reproducible runs.
    pub seed: u64,
}

impl Default for MockCameraSettings {
    fn default() -> Self {
        Self {
            frame_rate_hz: 20.0,
            width: 64,
            height: 64,
            pixel_size_um: 0.1,
            seed: 42,
        }
    }
}

/// Root settings for the control core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Orchestrator tuning.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Actuator output shaping.
    #[serde(default)]
    pub actuator: ActuatorSettings,
    /// Mock camera used by the demo binary.
    #[serde(default)]
    pub mock_camera: MockCameraSettings,
    /// Free-form parameter table for the selected analyzer.
    #[serde(default = "empty_table")]
    pub analyzer: toml::Value,
    /// Free-form parameter table for the selected controller.
    #[serde(default = "empty_table")]
    pub controller: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipeline: PipelineSettings::default(),
            actuator: ActuatorSettings::default(),
            mock_camera: MockCameraSettings::default(),
            analyzer: empty_table(),
            controller: empty_table(),
        }
    }
}

impl Settings {
    /// Loads settings: defaults, then `path` (if given), then environment.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Settings = figment
            .merge(Env::prefixed("ILLUMCTL_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what parsing can express.
    pub fn validate(&self) -> AppResult<()> {
        if self.pipeline.queue_capacity == 0 {
            return Err(ControlError::Configuration(
                "pipeline.queue_capacity must be at least 1".into(),
            ));
        }
        if self.pipeline.control_period.is_zero() {
            return Err(ControlError::Configuration(
                "pipeline.control_period must be non-zero".into(),
            ));
        }
        if !self.pipeline.setpoint.is_finite() {
            return Err(ControlError::Configuration(
                "pipeline.setpoint must be finite".into(),
            ));
        }
        if self.actuator.max_output <= 0.0 {
            return Err(ControlError::Configuration(
                "actuator.max_output must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.actuator.deadzone) {
            return Err(ControlError::Configuration(
                "actuator.deadzone must be in [0, 1)".into(),
            ));
        }
        if self.mock_camera.frame_rate_hz <= 0.0 {
            return Err(ControlError::Configuration(
                "mock_camera.frame_rate_hz must be positive".into(),
            ));
        }
        if self.mock_camera.width == 0 || self.mock_camera.height == 0 {
            return Err(ControlError::Configuration(
                "mock_camera dimensions must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Orchestrator configuration derived from these settings.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            queue_capacity: self.pipeline.queue_capacity,
            control_period: self.pipeline.control_period,
        }
    }
}
