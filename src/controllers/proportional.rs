//! Proportional (P) controller.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::{Controller, ControllerStatus};

/// Registry name of the proportional controller.
pub const NAME: &str = "proportional";

#[derive(Debug)]
struct State {
    setpoint: f64,
    last_output: f64,
}

/// Pure proportional control: `output = gain * (setpoint - sample)`.
///
/// The output is clamped to `[0, max_output]`; actuation values are
/// physical quantities (laser power) and cannot go negative. A `None`
/// sample holds the last output.
pub struct Proportional {
    gain: f64,
    max_output: f64,
    state: Mutex<State>,
}

impl Proportional {
    /// Creates a proportional controller.
    pub fn new(gain: f64, max_output: f64) -> Self {
        Self {
            gain,
            max_output,
            state: Mutex::new(State {
                setpoint: 0.0,
                last_output: 0.0,
            }),
        }
    }

    /// Builds a proportional controller from a TOML parameter table.
    ///
    /// Recognized parameters: `gain` (float, default 1.0), `max_output`
    /// (float, default unbounded).
    pub fn from_params(params: &toml::Value) -> Self {
        let gain = params
            .get("gain")
            .and_then(toml::Value::as_float)
            .unwrap_or(1.0);
        let max_output = params
            .get("max_output")
            .and_then(toml::Value::as_float)
            .unwrap_or(f64::INFINITY);
        Self::new(gain, max_output)
    }

    fn locked(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Controller for Proportional {
    fn name(&self) -> &str {
        NAME
    }

    fn set_setpoint(&self, setpoint: f64) {
        self.locked().setpoint = setpoint;
    }

    fn setpoint(&self) -> f64 {
        self.locked().setpoint
    }

    fn next_value(&self, sample: Option<f64>) -> f64 {
        let mut state = self.locked();
        // A non-finite sample is treated as absent: hold the last output.
        if let Some(sample) = sample.filter(|s| s.is_finite()) {
            let error = state.setpoint - sample;
            state.last_output = (self.gain * error).clamp(0.0, self.max_output);
        }
        state.last_output
    }

    fn current_output(&self) -> f64 {
        self.locked().last_output
    }

    fn status(&self) -> Option<ControllerStatus> {
        let state = self.locked();
        Some(ControllerStatus {
            name: NAME.to_string(),
            setpoint: state.setpoint,
            output: state.last_output,
        })
    }
}
