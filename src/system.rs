//! System facade tying registries, orchestrator, and actuator together.
//!
//! [`ControlSystem`] is what the configuration collaborator talks to: it
//! owns the analyzer and controller registries, enforces the rule that
//! selection changes are only permitted while the loop is `Idle`, and
//! drives the orchestrator's lifecycle. The active analyzer/controller
//! instances are constructed from their registered factories on `start` and
//! disposed on `stop` — the registries themselves never touch instance
//! lifecycles.
//!
//! One mutex guards both registries, their parameter tables, and the active
//! loop handle together, so "selected implies present" and "selection only
//! while idle" hold atomically even with concurrent configuration callers.
//! The guard is never held across an await point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::acquisition::FrameSender;
use crate::core::{Actuator, LoopState, Roi};
use crate::error::{AppResult, ControlError};
use crate::orchestrator::{ControlLoop, LoopConfig, LoopStatus};
use crate::registry::{
    AnalyzerFactory, AnalyzerRegistry, ControllerFactory, ControllerRegistry,
};

struct Inner {
    analyzers: AnalyzerRegistry,
    controllers: ControllerRegistry,
    analyzer_params: toml::Value,
    controller_params: toml::Value,
    setpoint: f64,
    roi: Option<Roi>,
    active: Option<ControlLoop>,
    // True while a taken-out loop is still tearing down outside the lock.
    // The system is not idle until the old analyzer is disposed.
    stopping: bool,
}

/// Top-level handle on the adaptive illumination core.
pub struct ControlSystem {
    inner: Mutex<Inner>,
    actuator: Arc<dyn Actuator>,
    loop_config: LoopConfig,
}

impl ControlSystem {
    /// Creates a system from explicit registries.
    pub fn new(
        analyzers: AnalyzerRegistry,
        controllers: ControllerRegistry,
        actuator: Arc<dyn Actuator>,
        loop_config: LoopConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                analyzers,
                controllers,
                analyzer_params: toml::Value::Table(toml::map::Map::new()),
                controller_params: toml::Value::Table(toml::map::Map::new()),
                setpoint: 0.0,
                roi: None,
                active: None,
                stopping: false,
            }),
            actuator,
            loop_config,
        }
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_idle(inner: &Inner) -> AppResult<()> {
        if inner.stopping {
            return Err(ControlError::InvalidState {
                expected: LoopState::Idle,
                actual: LoopState::Stopping,
            });
        }
        match &inner.active {
            None => Ok(()),
            Some(active) => Err(ControlError::InvalidState {
                expected: LoopState::Idle,
                actual: active.state(),
            }),
        }
    }

    // -------------------------------------------------------------------
    // Registry surface (configuration collaborator)
    // -------------------------------------------------------------------

    /// Registers an analyzer factory under a unique name.
    pub fn register_analyzer(
        &self,
        name: impl Into<String>,
        factory: AnalyzerFactory,
    ) -> AppResult<()> {
        self.locked().analyzers.register(name, factory)
    }

    /// Registers a controller factory under a unique name.
    pub fn register_controller(
        &self,
        name: impl Into<String>,
        factory: ControllerFactory,
    ) -> AppResult<()> {
        self.locked().controllers.register(name, factory)
    }

    /// Registered analyzer names, insertion-ordered.
    pub fn analyzer_names(&self) -> Vec<String> {
        self.locked().analyzers.list()
    }

    /// Registered controller names, insertion-ordered.
    pub fn controller_names(&self) -> Vec<String> {
        self.locked().controllers.list()
    }

    /// Selects the analyzer to be constructed on the next start, or clears
    /// the selection with `None`.
    ///
    /// Rejected with [`ControlError::InvalidState`] while the loop runs.
    pub fn select_analyzer(&self, name: Option<&str>) -> AppResult<()> {
        let mut inner = self.locked();
        Self::ensure_idle(&inner)?;
        inner.analyzers.select(name)
    }

    /// Selects the controller to be constructed on the next start, or
    /// clears the selection with `None`.
    ///
    /// Rejected with [`ControlError::InvalidState`] while the loop runs.
    pub fn select_controller(&self, name: Option<&str>) -> AppResult<()> {
        let mut inner = self.locked();
        Self::ensure_idle(&inner)?;
        inner.controllers.select(name)
    }

    /// Currently selected analyzer name.
    pub fn selected_analyzer(&self) -> Option<String> {
        self.locked().analyzers.selected().map(str::to_string)
    }

    /// Currently selected controller name.
    pub fn selected_controller(&self) -> Option<String> {
        self.locked().controllers.selected().map(str::to_string)
    }

    /// Parameter tables handed to the factories on the next start.
    pub fn set_params(&self, analyzer: toml::Value, controller: toml::Value) {
        let mut inner = self.locked();
        inner.analyzer_params = analyzer;
        inner.controller_params = controller;
    }

    // -------------------------------------------------------------------
    // Runtime configuration (accepted in any state)
    // -------------------------------------------------------------------

    /// Sets the process-variable setpoint.
    ///
    /// Forwarded to the active controller immediately when running, and
    /// remembered for the next start either way.
    pub fn set_setpoint(&self, setpoint: f64) {
        let mut inner = self.locked();
        inner.setpoint = setpoint;
        if let Some(active) = &inner.active {
            active.controller().set_setpoint(setpoint);
        }
    }

    /// The setpoint applied to newly started loops.
    pub fn setpoint(&self) -> f64 {
        self.locked().setpoint
    }

    /// Sets (or clears) the analysis ROI.
    ///
    /// Forwarded to the active analyzer immediately when running, and
    /// remembered for the next start either way.
    pub fn set_roi(&self, roi: Option<Roi>) {
        let mut inner = self.locked();
        inner.roi = roi;
        if let Some(active) = &inner.active {
            active.analyzer().set_roi(roi);
        }
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Starts the control loop from the current selections.
    ///
    /// Constructs fresh analyzer/controller instances via their factories,
    /// applies the stored setpoint and ROI, and returns the frame-queue
    /// producer handle for the acquisition collaborator. Fails when the
    /// loop is already running or either selection is missing.
    pub fn start(&self) -> AppResult<FrameSender> {
        let mut inner = self.locked();
        Self::ensure_idle(&inner)?;

        let analyzer = {
            let factory = inner
                .analyzers
                .selected_descriptor()
                .ok_or(ControlError::NothingSelected("analyzer"))?;
            factory(&inner.analyzer_params)?
        };
        let controller = {
            let factory = inner
                .controllers
                .selected_descriptor()
                .ok_or(ControlError::NothingSelected("controller"))?;
            factory(&inner.controller_params)?
        };

        controller.set_setpoint(inner.setpoint);
        analyzer.set_roi(inner.roi);

        let (active, sender) = ControlLoop::start(
            analyzer,
            controller,
            Arc::clone(&self.actuator),
            self.loop_config.clone(),
        );
        inner.active = Some(active);
        info!("control system started");
        Ok(sender)
    }

    /// Stops the control loop if one is running.
    ///
    /// Safe to invoke from any state: a no-op when idle, cooperative
    /// teardown (in-flight frame completes, analyzer disposed once) when
    /// running. The system stays in `Stopping` for the whole teardown, so
    /// selection changes and restarts are rejected until the old analyzer
    /// has been disposed.
    pub async fn stop(&self) -> AppResult<()> {
        let active = {
            let mut inner = self.locked();
            let active = inner.active.take();
            inner.stopping = active.is_some();
            active
        };
        match active {
            None => Ok(()),
            Some(active) => {
                let result = active.stop().await;
                self.locked().stopping = false;
                info!("control system stopped");
                result
            }
        }
    }

    /// Current loop state; `Idle` when no loop is active.
    pub fn state(&self) -> LoopState {
        let inner = self.locked();
        if inner.stopping {
            return LoopState::Stopping;
        }
        inner
            .active
            .as_ref()
            .map_or(LoopState::Idle, ControlLoop::state)
    }

    /// Loop status snapshot, or `None` when idle.
    pub fn status(&self) -> Option<LoopStatus> {
        self.locked().active.as_ref().map(ControlLoop::status)
    }

    /// Non-destructive read of the active analyzer's monitoring signal.
    ///
    /// `None` when idle. Never perturbs the loop.
    pub fn intermittent_output(&self) -> Option<f64> {
        self.locked()
            .active
            .as_ref()
            .map(|a| a.analyzer().intermittent_output())
    }
}
