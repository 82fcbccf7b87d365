//! Actuator implementations and wrappers.
//!
//! The [`Actuator`] trait itself lives in [`crate::core`]; this module holds
//! the pieces the loop ships with:
//!
//! - [`NullActuator`] — logs the value and discards it; the default sink for
//!   tests and dry runs.
//! - [`BoundedActuator`] — decorates a real actuator with a physical output
//!   clamp and a relative dead-zone, so a noisy controller does not chatter
//!   the hardware with sub-resolution updates.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::core::Actuator;
use crate::error::AppResult;

/// Discards actuation values, logging them at debug level.
#[derive(Debug, Default)]
pub struct NullActuator;

#[async_trait]
impl Actuator for NullActuator {
    fn name(&self) -> &str {
        "null"
    }

    async fn set_output(&self, value: f64) -> AppResult<()> {
        debug!(value, "null actuator output");
        Ok(())
    }
}

/// Clamps and dead-zones actuation values before forwarding them.
///
/// Values are clamped to `[0, max_output]`. A forwarded value is remembered;
/// subsequent values whose relative change against it is below the
/// `deadzone` fraction are swallowed, which keeps slow hardware (laser power
/// supplies, AOTFs) from being hammered with updates it cannot resolve. The
/// first value after construction is always forwarded.
pub struct BoundedActuator<A> {
    inner: A,
    max_output: f64,
    deadzone: f64,
    last_sent: Mutex<Option<f64>>,
}

impl<A: Actuator> BoundedActuator<A> {
    /// Wraps `inner`, clamping to `[0, max_output]` with the given relative
    /// dead-zone fraction (0.0 disables the dead-zone).
    pub fn new(inner: A, max_output: f64, deadzone: f64) -> Self {
        Self {
            inner,
            max_output,
            deadzone,
            last_sent: Mutex::new(None),
        }
    }

    fn locked(&self) -> MutexGuard<'_, Option<f64>> {
        self.last_sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn should_forward(&self, clamped: f64) -> bool {
        let last = self.locked();
        match *last {
            None => true,
            Some(prev) if prev == 0.0 => clamped != 0.0,
            Some(prev) => ((clamped - prev) / prev).abs() >= self.deadzone,
        }
    }
}

#[async_trait]
impl<A: Actuator> Actuator for BoundedActuator<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn set_output(&self, value: f64) -> AppResult<()> {
        let clamped = value.clamp(0.0, self.max_output);
        if !self.should_forward(clamped) {
            trace!(value, clamped, "actuation change inside dead-zone, skipped");
            return Ok(());
        }
        self.inner.set_output(clamped).await?;
        *self.locked() = Some(clamped);
        Ok(())
    }
}
