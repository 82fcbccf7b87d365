//! Built-in analyzer implementations.
//!
//! These are reference implementations of the [`crate::core::Analyzer`]
//! contract, kept deliberately cheap on the per-frame path:
//!
//! - [`integrator::Integrator`] — accumulates the mean intensity of each
//!   frame; its batch output is the sum of per-frame signals since the last
//!   batch read.
//! - [`spot_count::SpotCounter`] — counts above-threshold pixels per unit
//!   area as a crude fluorophore density estimate.
//!
//! Both follow the same internal discipline: the ROI and accumulation state
//! live behind one mutex, the pixel scan runs outside of it, and the final
//! state update is a short critical section whose release makes the frame's
//! contribution visible to batch/intermittent readers.

pub mod integrator;
pub mod spot_count;

use std::sync::Arc;

use crate::core::Analyzer;
use crate::registry::AnalyzerRegistry;

/// Registry pre-populated with the built-in analyzers.
pub fn builtin_analyzers() -> AnalyzerRegistry {
    let mut registry = AnalyzerRegistry::new();
    // Names are unique by construction; registration cannot collide here.
    let _ = registry.register(
        integrator::NAME,
        Box::new(|params: &toml::Value| {
            Ok(Arc::new(integrator::Integrator::from_params(params)) as Arc<dyn Analyzer>)
        }) as crate::registry::AnalyzerFactory,
    );
    let _ = registry.register(
        spot_count::NAME,
        Box::new(|params: &toml::Value| {
            Ok(Arc::new(spot_count::SpotCounter::from_params(params)) as Arc<dyn Analyzer>)
        }) as crate::registry::AnalyzerFactory,
    );
    registry
}
