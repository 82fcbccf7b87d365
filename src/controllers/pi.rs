//! Proportional-integral (PI) controller.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::{Controller, ControllerStatus};

/// Registry name of the PI controller.
pub const NAME: &str = "pi";

#[derive(Debug, Default)]
struct State {
    setpoint: f64,
    integral: f64,
    last_output: f64,
}

/// PI control with output clamping and conditional anti-windup.
///
/// Per cycle: `output = p_gain * error + integral`, where the integral term
/// grows by `i_gain * error`. The output is clamped to `[0, max_output]`;
/// while it is saturated the integral term is frozen so it cannot wind up
/// beyond what the actuator can express. A `None` sample leaves both
/// accumulator and output untouched.
pub struct Pi {
    p_gain: f64,
    i_gain: f64,
    max_output: f64,
    state: Mutex<State>,
}

impl Pi {
    /// Creates a PI controller.
    pub fn new(p_gain: f64, i_gain: f64, max_output: f64) -> Self {
        Self {
            p_gain,
            i_gain,
            max_output,
            state: Mutex::new(State::default()),
        }
    }

    /// Builds a PI controller from a TOML parameter table.
    ///
    /// Recognized parameters: `p_gain` (float, default 1.0), `i_gain`
    /// (float, default 0.1), `max_output` (float, default unbounded).
    pub fn from_params(params: &toml::Value) -> Self {
        let p_gain = params
            .get("p_gain")
            .and_then(toml::Value::as_float)
            .unwrap_or(1.0);
        let i_gain = params
            .get("i_gain")
            .and_then(toml::Value::as_float)
            .unwrap_or(0.1);
        let max_output = params
            .get("max_output")
            .and_then(toml::Value::as_float)
            .unwrap_or(f64::INFINITY);
        Self::new(p_gain, i_gain, max_output)
    }

    fn locked(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Controller for Pi {
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
        // A non-finite sample is treated as absent: hold state and output.
        if let Some(sample) = sample.filter(|s| s.is_finite()) {
            let error = state.setpoint - sample;
            let candidate_integral = state.integral + self.i_gain * error;
            let raw = self.p_gain * error + candidate_integral;
            if (0.0..=self.max_output).contains(&raw) {
                state.integral = candidate_integral;
                state.last_output = raw;
            } else {
                // Saturated: clamp the output, freeze the integral.
                state.last_output = raw.clamp(0.0, self.max_output);
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_accumulates_across_cycles() {
        let controller = Pi::new(1.0, 0.5, f64::INFINITY);
        controller.set_setpoint(2.0);
        // error = 2.0 each cycle: integral grows by 1.0 per cycle.
        assert_eq!(controller.next_value(Some(0.0)), 3.0);
        assert_eq!(controller.next_value(Some(0.0)), 4.0);
        assert_eq!(controller.next_value(Some(0.0)), 5.0);
    }

    #[test]
    fn test_none_sample_freezes_accumulator_and_output() {
        let controller = Pi::new(1.0, 0.5, f64::INFINITY);
        controller.set_setpoint(2.0);
        controller.next_value(Some(0.0));
        let before = controller.current_output();

        assert_eq!(controller.next_value(None), before);
        assert_eq!(controller.current_output(), before);
        // The skipped cycle must not have advanced the integral either:
        // the next real sample continues from where cycle one left off.
        assert_eq!(controller.next_value(Some(0.0)), 4.0);
    }

    #[test]
    fn test_anti_windup_freezes_integral_while_saturated() {
        let controller = Pi::new(0.0, 1.0, 10.0);
        controller.set_setpoint(100.0);
        // error = 100 drives the raw output far past max_output.
        assert_eq!(controller.next_value(Some(0.0)), 10.0);
        assert_eq!(controller.next_value(Some(0.0)), 10.0);
        // Once the error collapses, the output recovers immediately instead
        // of bleeding off a wound-up integral.
        let recovered = controller.next_value(Some(100.0));
        assert!(recovered <= 10.0);
    }

    #[test]
    fn test_non_finite_sample_is_treated_as_absent() {
        let controller = Pi::new(1.0, 0.5, f64::INFINITY);
        controller.set_setpoint(2.0);
        controller.next_value(Some(0.0));
        let before = controller.current_output();
        assert_eq!(controller.next_value(Some(f64::NAN)), before);
        assert_eq!(controller.current_output(), before);
    }

    #[test]
    fn test_setpoint_change_applies_on_next_cycle() {
        let controller = Pi::new(1.0, 0.0, f64::INFINITY);
        controller.set_setpoint(5.0);
        assert_eq!(controller.next_value(Some(0.0)), 5.0);
        controller.set_setpoint(8.0);
        assert_eq!(controller.setpoint(), 8.0);
        assert_eq!(controller.next_value(Some(0.0)), 8.0);
    }

    #[test]
    fn test_from_params() {
        let params: toml::Value =
            toml::from_str("p_gain = 2.0\ni_gain = 0.0\nmax_output = 100.0")
                .expect("toml");
        let controller = Pi::from_params(&params);
        controller.set_setpoint(3.0);
        assert_eq!(controller.next_value(Some(1.0)), 4.0);
    }
}
