//! Custom error types for the application.
//!
//! This module defines the primary error type, `ControlError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from configuration issues to registry collisions and plugin faults.
//!
//! ## Error Hierarchy
//!
//! `ControlError` is an enum that consolidates the error sources of the
//! control core:
//!
//! - **`Config`**: Wraps errors from the `figment` crate, typically related
//!   to file parsing or format issues in the configuration files.
//! - **`Configuration`**: Represents semantic errors in the configuration,
//!   such as values that parse fine but are logically invalid (e.g., a zero
//!   queue capacity). These are caught during the validation step.
//! - **`DuplicateName` / `UnknownName`**: Registry contract violations. A
//!   duplicate registration never overwrites the existing entry; selecting
//!   an unknown name never changes the current selection.
//! - **`InvalidState`**: An operation was attempted in a loop state that
//!   does not permit it (e.g., swapping the analyzer while the loop runs).
//! - **`Analyzer` / `Controller` / `Actuator`**: Faults raised by pluggable
//!   implementations. During a running loop these are logged and the cycle
//!   skipped; they are only returned synchronously from configuration-time
//!   calls.
//! - **`ShutdownFailed`**: Collects the errors of a best-effort teardown so
//!   that none of them is silently lost.
//!
//! By using `#[from]`, `ControlError` can be seamlessly created from
//! underlying error types, simplifying error handling throughout the crate
//! with the `?` operator.

use thiserror::Error;

use crate::core::LoopState;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ControlError>;

/// Primary error type for the illumination control core.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O error (config files, demo output).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A registry entry with this name already exists.
    #[error("Name '{0}' is already registered; existing entry retained")]
    DuplicateName(String),

    /// No registry entry with this name exists.
    #[error("No such registered name: '{0}'")]
    UnknownName(String),

    /// Operation not permitted in the current loop state.
    #[error("Invalid loop state: expected {expected}, actual {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: LoopState,
        /// State the loop was actually in.
        actual: LoopState,
    },

    /// Loop start requires both an analyzer and a controller selection.
    #[error("No {0} selected; select one before starting the loop")]
    NothingSelected(&'static str),

    /// Fault raised by an analyzer implementation.
    #[error("Analyzer error: {0}")]
    Analyzer(String),

    /// Fault raised by a controller implementation.
    #[error("Controller error: {0}")]
    Controller(String),

    /// Fault raised by the actuator collaborator.
    #[error("Actuator error: {0}")]
    Actuator(String),

    /// One or more teardown steps failed.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<ControlError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ControlError::Analyzer("spot detection failed".to_string());
        assert_eq!(err.to_string(), "Analyzer error: spot detection failed");
    }

    #[test]
    fn test_duplicate_name_display() {
        let err = ControlError::DuplicateName("spot-count".into());
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = ControlError::InvalidState {
            expected: LoopState::Idle,
            actual: LoopState::Running,
        };
        assert!(err.to_string().contains("expected Idle"));
        assert!(err.to_string().contains("actual Running"));
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = ControlError::ShutdownFailed(vec![
            ControlError::Analyzer("camera window close timeout".into()),
            ControlError::Actuator("laser interlock".into()),
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
    }
}
