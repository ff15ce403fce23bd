//! Orchestration Layer
//!
//! This crate decides what the kernel runs and when:
//! - Configuration loading and validation
//! - Scene construction (fluid blocks, rigid bodies)
//! - Frame delta-time policy (fixed / dynamic, slow motion, clamping)
//! - The frame / outer step / sub-step scheduler with multi-rate rigid-body coupling
//! - Pending particle insertion and pointer input tracking
//! - Simulation runner with lifecycle management

#![warn(missing_docs)]

pub mod config;
pub mod input;
pub mod insertion;
pub mod runner;
pub mod scene;
pub mod scheduler;
pub mod timing;

pub use config::{BackendChoice, ConfigError, SimulationConfig, TimeStepMode};
pub use input::PointerSample;
pub use runner::{RunnerState, SimulationRunner};
pub use scheduler::{Counters, FrameInput, FrameReport, SchedulerError, SimulationScheduler};
pub use timing::{FrameDeltas, TimeStepPolicy};

use kernel::ReferenceKernels;
use std::path::Path;

/// Build a scheduler for `config` driven by the reference CPU kernels.
pub fn create_scheduler(config: SimulationConfig) -> Result<SimulationScheduler, SchedulerError> {
    SimulationScheduler::new(config, Box::new(ReferenceKernels::default()))
}

/// Create a complete simulation from a configuration file
///
/// This function performs the full simulation setup pipeline:
/// 1. Load and validate the configuration
/// 2. Allocate the world and load the initial scene
/// 3. Create the scheduler with the reference kernels on the configured backend
/// 4. Wrap it in a SimulationRunner for lifecycle management
///
/// # Example
/// ```no_run
/// use orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/dam_break.json")?;
/// runner.start();
/// // ... query status, pause, resume, etc.
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_simulation(config_path: impl AsRef<Path>) -> Result<SimulationRunner, SchedulerError> {
    let config_path = config_path.as_ref();
    tracing::info!("Creating simulation from config: {}", config_path.display());

    let config = SimulationConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);

    let scheduler = create_scheduler(config)?;
    tracing::info!("Simulation ready to start");
    Ok(SimulationRunner::new(scheduler))
}
