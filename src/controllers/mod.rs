//! Built-in control law implementations.
//!
//! Reference implementations of the [`crate::core::Controller`] contract:
//!
//! - [`proportional::Proportional`] — pure P control.
//! - [`pi::Pi`] — PI control with output clamping and conditional
//!   anti-windup.
//! - [`manual::Manual`] — open-loop; the output tracks the setpoint and the
//!   process variable is ignored.
//!
//! All three keep setpoint and accumulators behind one mutex so that
//! `set_setpoint` from a configuration path can interleave with the control
//! task's `next_value` without tearing state, and all three treat a `None`
//! sample as "hold last output".

pub mod manual;
pub mod pi;
pub mod proportional;

use std::sync::Arc;

use crate::core::Controller;
use crate::registry::ControllerRegistry;

/// Registry pre-populated with the built-in controllers.
pub fn builtin_controllers() -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();
    // Names are unique by construction; registration cannot collide here.
    let _ = registry.register(
        proportional::NAME,
        Box::new(|params: &toml::Value| {
            Ok(Arc::new(proportional::Proportional::from_params(params))
                as Arc<dyn Controller>)
        }) as crate::registry::ControllerFactory,
    );
    let _ = registry.register(
        pi::NAME,
        Box::new(|params: &toml::Value| {
            Ok(Arc::new(pi::Pi::from_params(params)) as Arc<dyn Controller>)
        }) as crate::registry::ControllerFactory,
    );
    let _ = registry.register(
        manual::NAME,
        Box::new(|params: &toml::Value| {
            Ok(Arc::new(manual::Manual::from_params(params)) as Arc<dyn Controller>)
        }) as crate::registry::ControllerFactory,
    );
    registry
}
