//! Simulation runner with lifecycle management
//!
//! This module provides the `SimulationRunner` which drives a
//! [`SimulationScheduler`] frame by frame in a background thread, paced to the
//! configured frame rate, and exposes start, pause, resume, frame stepping,
//! reset and status queries.

use glam::Vec2;
use kernel::ParticleSeed;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::input::PointerSample;
use crate::scheduler::{FrameInput, SimulationScheduler};

/// Runner state enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Time paused; frames still sort and render
    Paused,
    /// Simulation finished (reached stopping condition)
    Finished,
    /// Simulation encountered an error
    Error,
}

/// Host requests applied at the next frame boundary
#[derive(Debug, Clone, PartialEq)]
enum Command {
    FrameStep,
    Reset,
    SlowMotion(bool),
    Submit(Vec<ParticleSeed>),
}

/// Snapshot published after every frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerSnapshot {
    /// Frames run
    pub frame_count: u64,
    /// Sub-steps run
    pub step_count: u64,
    /// Simulated time (seconds)
    pub sim_time: f64,
    /// Active particles
    pub particle_count: usize,
    /// Rigid-body centres
    pub body_positions: Vec<Vec2>,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    /// Current runner state
    state: RunnerState,
    /// Latest published snapshot
    snapshot: RunnerSnapshot,
    /// Latest pointer sample from the host
    pointer: PointerSample,
    /// Requests not yet applied
    commands: Vec<Command>,
    /// Most recent error message (if state is Error)
    error_message: Option<String>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    /// Shared state (protected by mutex)
    shared: Arc<Mutex<SharedState>>,
    /// Handle to the background thread
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SimulationRunner {
    /// Create a runner around `scheduler`. The thread waits for [`Self::start`].
    pub fn new(scheduler: SimulationScheduler) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            snapshot: RunnerSnapshot::default(),
            pointer: PointerSample::default(),
            commands: Vec::new(),
            error_message: None,
        }));

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::spawn(move || run_simulation_loop(scheduler, shared_clone));

        Self {
            shared,
            thread_handle: Some(thread_handle),
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state.clone()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> RunnerSnapshot {
        lock(&self.shared).snapshot.clone()
    }

    /// Get current simulation time (seconds)
    pub fn sim_time(&self) -> f64 {
        lock(&self.shared).snapshot.sim_time
    }

    /// Get number of frames run
    pub fn frame_count(&self) -> u64 {
        lock(&self.shared).snapshot.frame_count
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Created {
            state.state = RunnerState::Running;
        }
    }

    /// Pause the simulation
    pub fn pause(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Running {
            state.state = RunnerState::Paused;
        }
    }

    /// Resume the simulation
    pub fn resume(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Paused {
            state.state = RunnerState::Running;
        }
    }

    /// Simulate one frame while paused
    pub fn frame_step(&self) {
        lock(&self.shared).commands.push(Command::FrameStep);
    }

    /// Restore the initial scene
    pub fn reset(&self) {
        lock(&self.shared).commands.push(Command::Reset);
    }

    /// Toggle slow motion
    pub fn set_slow_motion(&self, on: bool) {
        lock(&self.shared).commands.push(Command::SlowMotion(on));
    }

    /// Queue particles for admission
    pub fn submit_particles(&self, seeds: Vec<ParticleSeed>) {
        lock(&self.shared).commands.push(Command::Submit(seeds));
    }

    /// Update the pointer sample used by subsequent frames
    pub fn set_pointer(&self, pointer: PointerSample) {
        lock(&self.shared).pointer = pointer;
    }

    /// Stop the simulation at the next frame boundary
    pub fn stop(&self) {
        let mut state = lock(&self.shared);
        if state.state != RunnerState::Error {
            state.state = RunnerState::Finished;
        }
    }

    /// Wait for the simulation thread to complete
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| "Thread panicked".to_string())?;
        }
        Ok(())
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        // Set state to Finished to signal thread to exit
        let mut state = lock(&self.shared);
        if matches!(state.state, RunnerState::Created | RunnerState::Running | RunnerState::Paused) {
            state.state = RunnerState::Finished;
        }
    }
}

/// Main simulation loop executed in background thread
fn run_simulation_loop(mut scheduler: SimulationScheduler, shared: Arc<Mutex<SharedState>>) {
    // Wait for start signal
    loop {
        let state = lock(&shared).state.clone();
        match state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running | RunnerState::Paused => break,
            RunnerState::Finished | RunnerState::Error => return,
        }
    }

    let frame_interval = Duration::from_secs_f32(1.0 / scheduler.config().target_frame_rate);
    let max_frames = scheduler.config().max_frames;
    let max_time = scheduler.config().max_time;
    let start_wall_time = Instant::now();
    let mut last_frame = Instant::now();

    loop {
        let frame_start = Instant::now();
        let (state, pointer, commands) = {
            let mut guard = lock(&shared);
            (guard.state.clone(), guard.pointer, std::mem::take(&mut guard.commands))
        };

        match state {
            RunnerState::Running | RunnerState::Paused => {}
            RunnerState::Finished | RunnerState::Error | RunnerState::Created => break,
        }

        if state == RunnerState::Paused {
            scheduler.pause();
        } else {
            scheduler.resume();
        }
        for command in commands {
            match command {
                Command::FrameStep => scheduler.request_frame_step(),
                Command::Reset => scheduler.request_reset(),
                Command::SlowMotion(on) => scheduler.set_slow_motion(on),
                Command::Submit(seeds) => {
                    scheduler.submit_particles(seeds);
                }
            }
        }

        let elapsed = last_frame.elapsed().as_secs_f32();
        last_frame = Instant::now();
        if let Err(e) = scheduler.step(&FrameInput { elapsed, pointer }) {
            tracing::error!("Simulation frame failed: {}", e);
            let mut guard = lock(&shared);
            guard.state = RunnerState::Error;
            guard.error_message = Some(e.to_string());
            break;
        }

        let counters = scheduler.counters();
        {
            let world = scheduler.world();
            let mut guard = lock(&shared);
            guard.snapshot = RunnerSnapshot {
                frame_count: counters.frame_count,
                step_count: counters.step_count,
                sim_time: counters.sim_time,
                particle_count: world.particles.len(),
                body_positions: world.bodies.bodies.iter().map(|b| b.pos).collect(),
            };
        }

        // Check stopping conditions
        let reached_frames = max_frames.is_some_and(|max| counters.frame_count >= max);
        let reached_time = max_time.is_some_and(|max| counters.sim_time >= max);
        if reached_frames || reached_time {
            tracing::info!(
                "Simulation finished: {} frames, {:.4}s simulated",
                counters.frame_count,
                counters.sim_time
            );
            lock(&shared).state = RunnerState::Finished;
            break;
        }

        if let Some(rest) = frame_interval.checked_sub(frame_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    let counters = scheduler.counters();
    tracing::info!(
        "Simulation thread exiting: {} frames, {} steps, {:.4}s simulated, wall_time={:.2}s",
        counters.frame_count,
        counters.step_count,
        counters.sim_time,
        start_wall_time.elapsed().as_secs_f64()
    );
}
