//! Core library of the adaptive illumination control loop.
//!
//! `illumctl` closes the feedback loop of an adaptive microscopy setup: a
//! stream of acquired images is continuously reduced to a scalar signal
//! (e.g., an estimated fluorophore density) by a pluggable [`core::Analyzer`],
//! and that signal drives a pluggable [`core::Controller`] whose actuation
//! output (e.g., a laser power) regulates the imaging process in real time.
//!
//! The crate provides the runtime coordination contract between image
//! acquisition, asynchronous analysis, and periodic control evaluation
//! ([`orchestrator`]), and the name-keyed registration/selection mechanism
//! that lets either side be swapped at runtime without breaking the loop's
//! timing or thread-safety guarantees ([`registry`], [`system`]).
//!
//! GUI panels, hardware drivers, and persistence are external
//! collaborators: they talk to [`system::ControlSystem`] and the
//! [`acquisition::FrameSender`] handle, and the core knows nothing about
//! their internals.

pub mod acquisition;
pub mod actuator;
pub mod analyzers;
pub mod config;
pub mod controllers;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod system;

pub use crate::config::Settings;
pub use crate::core::{
    Actuator, Analyzer, Controller, ImageFrame, LoopState, PixelBuffer, Roi,
};
pub use crate::error::{AppResult, ControlError};
pub use crate::orchestrator::{ControlLoop, LoopConfig, LoopStatus};
pub use crate::system::ControlSystem;
