//! Demo binary: runs the control loop against the mock camera.
//!
//! Registers the built-in analyzers and controllers, starts the loop with
//! the requested pair, feeds it synthetic frames for a fixed duration, and
//! prints the final loop status as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use illumctl::acquisition::MockCamera;
use illumctl::actuator::{BoundedActuator, NullActuator};
use illumctl::analyzers::builtin_analyzers;
use illumctl::controllers::builtin_controllers;
use illumctl::{ControlSystem, Settings};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "illumctl", about = "Adaptive illumination control loop demo")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Analyzer to select.
    #[arg(long, default_value = "spot-count")]
    analyzer: String,

    /// Controller to select.
    #[arg(long, default_value = "pi")]
    controller: String,

    /// How long to run the loop, in seconds.
    #[arg(long, default_value_t = 5.0)]
    seconds: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings =
        Settings::load(cli.config.as_deref()).context("loading configuration")?;

    let actuator = Arc::new(BoundedActuator::new(
        NullActuator,
        settings.actuator.max_output,
        settings.actuator.deadzone,
    ));
    let system = ControlSystem::new(
        builtin_analyzers(),
        builtin_controllers(),
        actuator,
        settings.loop_config(),
    );
    system.set_params(settings.analyzer.clone(), settings.controller.clone());
    system.set_setpoint(settings.pipeline.setpoint);

    system
        .select_analyzer(Some(&cli.analyzer))
        .with_context(|| format!("selecting analyzer '{}'", cli.analyzer))?;
    system
        .select_controller(Some(&cli.controller))
        .with_context(|| format!("selecting controller '{}'", cli.controller))?;

    let sender = system.start().context("starting control loop")?;
    let camera = MockCamera::new(settings.mock_camera.clone());
    let camera_task = camera.spawn(sender);

    info!(seconds = cli.seconds, "loop running");
    tokio::time::sleep(Duration::from_secs_f64(cli.seconds)).await;

    let status = system.status().context("loop vanished before stop")?;
    system.stop().await.context("stopping control loop")?;
    camera_task.await.context("joining camera task")?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
