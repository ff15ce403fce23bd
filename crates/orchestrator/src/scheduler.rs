//! Frame / outer step / sub-step scheduler.
//!
//! One [`SimulationScheduler::step`] call advances one host frame:
//!
//! ```text
//! frame      admit pending particles
//!            for i in 0..outer_steps
//!   outer      refresh pointer, flip frame buffer, sort if stale, render if i == 0
//!              for j in 0..sub_steps
//!     sub        particle pass, rigid-body group if j % divisor == 0,
//!                UpdatePositions, advance counters
//!              index goes stale
//! ```
//!
//! Paused frames only re-sort (if stale) and render.

use kernel::{
    BufferId, CommandQueue, ConsumeError, DispatchError, ExecBackend, GridError, InteractionState, KernelId,
    ParticleSeed, SimWorld, SimulationKernels, StepParams,
};

use crate::config::{BackendChoice, ConfigError, SimulationConfig};
use crate::input::{InputTracker, PointerSample};
use crate::insertion::PendingInsertions;
use crate::scene::build_world;
use crate::timing::{rigid_body_groups, FrameDeltas, TimeStepPolicy};

/// Scheduler failures. Any of these aborts the current frame.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// World allocation failed
    #[error("failed to allocate simulation world: {0}")]
    Grid(#[from] GridError),
    /// Worker pool could not be created
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    /// A dispatch was refused
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Rigid-body adjustments were consumed out of order
    #[error(transparent)]
    Consume(#[from] ConsumeError),
}

/// Host input for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameInput {
    /// Wall-clock seconds since the previous frame.
    pub elapsed: f32,
    /// Pointer state.
    pub pointer: PointerSample,
}

impl FrameInput {
    /// Frame with no pointer activity.
    pub fn idle(elapsed: f32) -> Self {
        Self { elapsed, pointer: PointerSample::default() }
    }
}

/// One rigid-body group run during a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbUpdate {
    /// Outer step index.
    pub outer_step: u32,
    /// First sub-step of the group.
    pub sub_step: u32,
    /// Delta time the group integrated over.
    pub delta_time: f32,
}

/// What a frame did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Frame number (0-based).
    pub frame: u64,
    /// Whether time advanced (false for paused frames).
    pub simulated: bool,
    /// Whether a pending reset ran at the start of this frame.
    pub reset: bool,
    /// This frame's deltas.
    pub deltas: FrameDeltas,
    /// Sub-steps taken.
    pub sub_steps: u32,
    /// Rigid-body groups run.
    pub rb_updates: Vec<RbUpdate>,
    /// Render dispatches.
    pub renders: u32,
    /// Spatial index rebuilds.
    pub sorts: u32,
    /// Particles admitted from the pending queue.
    pub admitted: usize,
}

/// Program-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Counters {
    /// Sub-steps since the scene started.
    pub step_count: u64,
    /// Frames since the scene started, paused frames included.
    pub frame_count: u64,
    /// Simulated time.
    pub sim_time: f64,
    /// Scaled time of simulated frames.
    pub total_scaled_time: f64,
    /// Wall-clock time seen by the scheduler.
    pub total_rl_time: f64,
}

/// Owns the world, the dispatch queue and the kernel implementation, and
/// decides what runs when.
pub struct SimulationScheduler {
    config: SimulationConfig,
    policy: TimeStepPolicy,
    world: SimWorld,
    queue: CommandQueue,
    kernels: Box<dyn SimulationKernels>,
    pending: PendingInsertions,
    input: InputTracker,
    counters: Counters,
    paused: bool,
    frame_step: bool,
    slow_motion: bool,
    reset_requested: bool,
    frame_buffer_cycle: bool,
}

impl std::fmt::Debug for SimulationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationScheduler")
            .field("name", &self.config.name)
            .field("counters", &self.counters)
            .field("paused", &self.paused)
            .field("particles", &self.world.particles.len())
            .finish_non_exhaustive()
    }
}

impl SimulationScheduler {
    /// Validate `config`, build its scene and set up the dispatch queue.
    pub fn new(config: SimulationConfig, kernels: Box<dyn SimulationKernels>) -> Result<Self, SchedulerError> {
        config.validate()?;
        let backend = match config.backend {
            BackendChoice::Serial => ExecBackend::Serial,
            BackendChoice::Parallel { threads } => ExecBackend::parallel(threads)?,
        };
        let world = build_world(&config)?;
        let mut queue = CommandQueue::new(backend);
        queue.set_recording(false);
        mark_resident(&mut queue);

        tracing::info!(
            name = %config.name,
            threads = queue.backend().threads(),
            outer_steps = config.outer_steps,
            sub_steps = config.sub_steps,
            rb_update_divisor = config.rb_update_divisor,
            "scheduler created"
        );

        Ok(Self {
            policy: TimeStepPolicy::from_config(&config),
            pending: PendingInsertions::new(config.max_pending_particles),
            config,
            world,
            queue,
            kernels,
            input: InputTracker::default(),
            counters: Counters::default(),
            paused: false,
            frame_step: false,
            slow_motion: false,
            reset_requested: false,
            frame_buffer_cycle: false,
        })
    }

    // -----------------------------------------------------------------------
    // Host controls
    // -----------------------------------------------------------------------

    /// Configuration the scheduler was built from.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Simulation buffers.
    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    /// Counters.
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Current pointer state as seen by the kernels.
    pub fn interaction(&self) -> InteractionState {
        self.input.state()
    }

    /// Dispatch queue (validity flags and, when recording, the dispatch log).
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Record every dispatch in the queue log. Off by default.
    pub fn set_dispatch_recording(&mut self, on: bool) {
        self.queue.set_recording(on);
    }

    /// Drop the recorded dispatch log.
    pub fn clear_dispatch_log(&mut self) {
        self.queue.clear_log();
    }

    /// Stop advancing time. Frames still sort and render.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume advancing time.
    pub fn resume(&mut self) {
        self.paused = false;
        self.frame_step = false;
    }

    /// Whether time is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// While paused, simulate exactly the next frame.
    pub fn request_frame_step(&mut self) {
        if self.paused {
            self.frame_step = true;
        }
    }

    /// Toggle slow motion.
    pub fn set_slow_motion(&mut self, on: bool) {
        if on != self.slow_motion {
            tracing::debug!(on, "slow motion");
        }
        self.slow_motion = on;
    }

    /// Whether slow motion is active.
    pub fn slow_motion(&self) -> bool {
        self.slow_motion
    }

    /// Host time scale; 0 stops time like a pause.
    pub fn set_time_scale(&mut self, scale: f32) {
        self.policy.time_scale = scale.max(0.0);
    }

    /// Restore the initial scene at the next frame boundary.
    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    /// Queue particles for admission at the next simulated frame. Returns how
    /// many the pending queue accepted.
    pub fn submit_particles(&mut self, seeds: impl IntoIterator<Item = ParticleSeed>) -> usize {
        self.pending.submit(seeds)
    }

    /// Particles waiting for admission.
    pub fn pending_particles(&self) -> usize {
        self.pending.len()
    }

    // -----------------------------------------------------------------------
    // Frame
    // -----------------------------------------------------------------------

    /// Advance one host frame.
    pub fn step(&mut self, input: &FrameInput) -> Result<FrameReport, SchedulerError> {
        let mut report = FrameReport { frame: self.counters.frame_count, ..Default::default() };

        if self.reset_requested {
            self.reset()?;
            report.reset = true;
            report.frame = 0;
        }

        let deltas = self.policy.frame_deltas(input.elapsed, self.slow_motion);
        report.deltas = deltas;
        self.counters.total_rl_time += f64::from(input.elapsed.max(0.0));

        let simulate =
            (!self.paused || std::mem::take(&mut self.frame_step)) && self.policy.is_running(self.slow_motion);
        if simulate {
            self.simulate_frame(input, &deltas, &mut report)?;
            self.counters.total_scaled_time += f64::from(deltas.scaled_time);
        } else {
            let params = self.step_params(&deltas, self.input.state(), 0);
            self.sort_if_stale(&mut report)?;
            self.render(&params, &mut report)?;
        }

        self.counters.frame_count += 1;
        if self.counters.frame_count % 120 == 0 {
            tracing::debug!(
                frame = self.counters.frame_count,
                steps = self.counters.step_count,
                sim_time = self.counters.sim_time,
                particles = self.world.particles.len(),
                delta_time = deltas.delta_time,
                "frame statistics"
            );
        }
        Ok(report)
    }

    fn simulate_frame(
        &mut self,
        input: &FrameInput,
        deltas: &FrameDeltas,
        report: &mut FrameReport,
    ) -> Result<(), SchedulerError> {
        report.simulated = true;
        report.admitted = self.pending.admit_into(&mut self.world.particles);
        if report.admitted > 0 {
            mark_index_stale(&mut self.queue);
        }

        let sub_steps = self.config.sub_steps;
        let divisor = self.config.rb_update_divisor;

        for i in 0..self.config.outer_steps {
            let interaction = self.input.refresh(&input.pointer);
            self.frame_buffer_cycle = !self.frame_buffer_cycle;

            self.sort_if_stale(report)?;
            if i == 0 {
                let params = self.step_params(deltas, interaction, 0);
                self.render(&params, report)?;
            }

            let mut groups = rigid_body_groups(sub_steps, divisor, deltas.delta_time).peekable();
            for j in 0..sub_steps {
                let mut params = self.step_params(deltas, interaction, j);
                self.particle_pass(&params)?;

                if let Some((_, rb_dt)) = groups.next_if(|&(start, _)| start == j) {
                    if !self.world.bodies.is_empty() {
                        params.rb_delta_time = rb_dt;
                        self.rigid_body_pass(&params)?;
                        report.rb_updates.push(RbUpdate { outer_step: i, sub_step: j, delta_time: rb_dt });
                    }
                }

                let n = self.world.particles.len();
                if n > 0 {
                    self.opaque(KernelId::UpdatePositions, n, &params)?;
                }

                self.counters.step_count += 1;
                self.counters.sim_time += f64::from(deltas.delta_time);
                report.sub_steps += 1;
            }

            mark_index_stale(&mut self.queue);
        }
        Ok(())
    }

    fn step_params(&self, deltas: &FrameDeltas, interaction: InteractionState, sub_step: u32) -> StepParams {
        StepParams {
            delta_time: deltas.delta_time,
            rl_delta_time: deltas.rl_delta_time,
            rb_delta_time: 0.0,
            sub_step,
            step_count: self.counters.step_count,
            frame_buffer_cycle: self.frame_buffer_cycle,
            gravity: self.config.scene.gravity,
            interaction,
            interaction_radius: self.config.interaction_radius,
            interaction_strength: self.config.interaction_strength,
            springs_enabled: self.config.springs_enabled,
        }
    }

    /// Rebuild the spatial index (and spring slots) if particles moved since
    /// the last sort.
    fn sort_if_stale(&mut self, report: &mut FrameReport) -> Result<(), SchedulerError> {
        if self.queue.is_valid(BufferId::StartIndices) || self.world.particles.is_empty() {
            return Ok(());
        }
        let world = &mut self.world;
        if world.sorter.run(&mut self.queue, &mut world.particles)? {
            report.sorts += 1;
        }
        if self.config.springs_enabled {
            world.spring_slots.run(&mut self.queue, &world.sorter)?;
        }
        Ok(())
    }

    fn render(&mut self, params: &StepParams, report: &mut FrameReport) -> Result<(), SchedulerError> {
        self.opaque(KernelId::Render, 1, params)?;
        report.renders += 1;
        Ok(())
    }

    fn particle_pass(&mut self, params: &StepParams) -> Result<(), SchedulerError> {
        let n = self.world.particles.len();
        if n == 0 {
            return Ok(());
        }
        self.opaque(KernelId::PreCalculations, n, params)?;
        self.opaque(KernelId::CalculateDensities, n, params)?;

        if params.sub_step == 0 && params.springs_enabled {
            self.world.springs.swap_halves(&self.world.spring_slots);
            let half = self.world.springs.half_len();
            self.opaque(KernelId::PrepSpringData, half, params)?;
            self.opaque(KernelId::TransferAllSpringData, half, params)?;
        }

        self.opaque(KernelId::ParticleForces, n, params)?;

        let world = &self.world;
        world.fluid.reset(&mut self.queue)?;
        world.fluid.record_particles(&mut self.queue, &world.particles, &world.materials)?;
        Ok(())
    }

    fn rigid_body_pass(&mut self, params: &StepParams) -> Result<(), SchedulerError> {
        let bodies = self.world.bodies.len();
        let vertices = self.world.bodies.world_vertices.len();
        let n = self.world.particles.len();

        self.world.accumulator.reset_all(&mut self.queue)?;
        self.opaque(KernelId::SimulateRbRb, bodies, params)?;
        self.opaque(KernelId::SimulateRbSprings, bodies, params)?;
        self.opaque(KernelId::AdjustRbDatas, bodies, params)?;
        if n > 0 {
            self.opaque(KernelId::SimulateRbParticle, n, params)?;
        }
        self.opaque(KernelId::ResetRbVertices, vertices, params)?;

        let world = &mut self.world;
        world.accumulator.consume_all(&mut self.queue, &mut world.bodies.bodies)?;

        self.opaque(KernelId::UpdateRigidBodies, bodies, params)?;
        self.opaque(KernelId::UpdateRbVertices, vertices, params)?;
        Ok(())
    }

    /// Issue `kernel` on the queue and hand it to the kernel implementation.
    fn opaque(&mut self, kernel: KernelId, lanes: usize, params: &StepParams) -> Result<(), DispatchError> {
        let backend = self.queue.issue(kernel, lanes)?;
        self.kernels.dispatch(kernel, lanes, backend, &mut self.world, params)
    }

    fn reset(&mut self) -> Result<(), SchedulerError> {
        self.world = build_world(&self.config)?;
        for buffer in BufferId::ALL {
            self.queue.mark_stale(buffer);
        }
        mark_resident(&mut self.queue);
        self.pending.clear();
        self.input.clear();
        self.counters = Counters::default();
        self.frame_buffer_cycle = false;
        self.frame_step = false;
        self.reset_requested = false;
        tracing::info!(name = %self.config.name, "scene reset");
        Ok(())
    }
}

/// Buffers that hold valid data from the moment the world is allocated.
fn mark_resident(queue: &mut CommandQueue) {
    for buffer in [BufferId::Particles, BufferId::Springs, BufferId::RigidBodies, BufferId::RbVertices] {
        queue.mark_valid(buffer);
    }
}

fn mark_index_stale(queue: &mut CommandQueue) {
    queue.mark_stale(BufferId::SpatialLookup);
    queue.mark_stale(BufferId::StartIndices);
}
