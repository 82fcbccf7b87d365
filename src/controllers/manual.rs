//! Manual (open-loop) controller.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::{Controller, ControllerStatus};

/// Registry name of the manual controller.
pub const NAME: &str = "manual";

#[derive(Debug, Default)]
struct State {
    setpoint: f64,
    last_output: f64,
}

/// Open-loop control: the output is the setpoint, the sample is ignored.
///
/// Useful for commissioning an actuator before a closed loop is trusted.
/// The setpoint here is the desired actuation value itself (e.g., a laser
/// power), not a process-variable target. The output only changes on a
/// `next_value` cycle, so mid-cycle setpoint edits take effect on the next
/// evaluation like every other controller.
pub struct Manual {
    state: Mutex<State>,
}

impl Manual {
    /// Creates a manual controller with output 0 until the first cycle.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Builds a manual controller from a TOML parameter table.
    ///
    /// No parameters are recognized; the table is accepted for interface
    /// uniformity.
    pub fn from_params(_params: &toml::Value) -> Self {
        Self::new()
    }

    fn locked(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Manual {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for Manual {
    fn name(&self) -> &str {
        NAME
    }

    fn set_setpoint(&self, setpoint: f64) {
        self.locked().setpoint = setpoint;
    }

    fn setpoint(&self) -> f64 {
        self.locked().setpoint
    }

    fn next_value(&self, _sample: Option<f64>) -> f64 {
        let mut state = self.locked();
        state.last_output = state.setpoint;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_tracks_setpoint() {
        let controller = Manual::new();
        controller.set_setpoint(42.0);
        assert_eq!(controller.next_value(Some(123.0)), 42.0);
        assert_eq!(controller.current_output(), 42.0);
    }

    #[test]
    fn test_sample_is_ignored() {
        let controller = Manual::new();
        controller.set_setpoint(7.0);
        assert_eq!(controller.next_value(None), 7.0);
        assert_eq!(controller.next_value(Some(f64::MAX)), 7.0);
    }

    #[test]
    fn test_setpoint_edit_applies_on_next_cycle() {
        let controller = Manual::new();
        controller.set_setpoint(1.0);
        controller.next_value(None);
        controller.set_setpoint(2.0);
        // current_output never recomputes; the new setpoint shows up only
        // after the next evaluation.
        assert_eq!(controller.current_output(), 1.0);
        assert_eq!(controller.next_value(None), 2.0);
    }
}
