//! The simulation world and the opaque-kernel boundary.
//!
//! [`SimWorld`] owns every buffer of the pipeline. The scheduler runs the
//! indexing stages (sort, slot allocation, accumulator, fluid records) itself
//! and hands everything else to a [`SimulationKernels`] implementation by
//! kernel id, lane count and the per-step parameters.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::accumulator::CrossDomainAccumulator;
use crate::dispatch::{DispatchError, ExecBackend, KernelId};
use crate::fixed_point::PrecisionTable;
use crate::fluid_record::FluidRecords;
use crate::particle::{ParticleArrays, ParticleMaterial, ParticleSeed};
use crate::rigid_body::{RigidBodyDesc, RigidBodySet};
use crate::spatial::{GridError, GridLayout, SpatialHashSorter};
use crate::springs::{SpringSlotAllocator, SpringStore};

/// Sizing and material parameters of a [`SimWorld`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    /// Particle slots.
    pub particle_capacity: usize,
    /// Upper bound of springs owned by one particle.
    pub max_springs_per_particle: u32,
    /// Neighbour search radius and grid cell size.
    pub influence_radius: f32,
    /// Simulation box `[0, boundary]`.
    pub boundary: Vec2,
    /// Fixed-point precision per domain.
    pub precision: PrecisionTable,
    /// Material per particle type index.
    pub materials: Vec<ParticleMaterial>,
}

/// Pointer state seen by the kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionState {
    /// Pointer position in simulation space.
    pub pointer: Vec2,
    /// Primary (attract) channel.
    pub left_pressed: bool,
    /// Secondary (repel) channel.
    pub right_pressed: bool,
}

/// Per-dispatch parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    /// Sub-step delta time.
    pub delta_time: f32,
    /// Unclamped per-sub-step delta derived from the wall clock.
    pub rl_delta_time: f32,
    /// Delta time of the current rigid-body group; 0 outside it.
    pub rb_delta_time: f32,
    /// Sub-step index within the outer step.
    pub sub_step: u32,
    /// Sub-steps taken since the scene started.
    pub step_count: u64,
    /// Toggled every outer step; selects the frame buffer to write.
    pub frame_buffer_cycle: bool,
    /// Gravity.
    pub gravity: Vec2,
    /// Pointer state.
    pub interaction: InteractionState,
    /// Pointer influence radius.
    pub interaction_radius: f32,
    /// Pointer influence strength.
    pub interaction_strength: f32,
    /// Whether particle springs take part this step.
    pub springs_enabled: bool,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            delta_time: 0.0,
            rl_delta_time: 0.0,
            rb_delta_time: 0.0,
            sub_step: 0,
            step_count: 0,
            frame_buffer_cycle: false,
            gravity: Vec2::ZERO,
            interaction: InteractionState::default(),
            interaction_radius: 0.0,
            interaction_strength: 0.0,
            springs_enabled: false,
        }
    }
}

/// All simulation buffers.
#[derive(Debug)]
pub struct SimWorld {
    /// Grid geometry.
    pub layout: GridLayout,
    /// Simulation box.
    pub boundary: Vec2,
    /// Fixed-point precision per domain.
    pub precision: PrecisionTable,
    /// Material per particle type index (never empty).
    pub materials: Vec<ParticleMaterial>,
    /// Particle state.
    pub particles: ParticleArrays,
    /// Spatial index.
    pub sorter: SpatialHashSorter,
    /// Spring slot capacities and offsets.
    pub spring_slots: SpringSlotAllocator,
    /// Spring buffer.
    pub springs: SpringStore,
    /// Rigid bodies and their vertices.
    pub bodies: RigidBodySet,
    /// Per-body adjustment slots.
    pub accumulator: CrossDomainAccumulator,
    /// Per-cell fluid measurements.
    pub fluid: FluidRecords,
}

impl SimWorld {
    /// Allocate every buffer for `config`.
    pub fn new(config: &WorldConfig) -> Result<Self, GridError> {
        let layout = GridLayout::new(config.boundary, config.influence_radius)?;
        let sorter = SpatialHashSorter::new(layout, config.particle_capacity)?;
        let cells = layout.cell_count();
        let materials = if config.materials.is_empty() {
            vec![ParticleMaterial::default()]
        } else {
            config.materials.clone()
        };
        tracing::info!(
            capacity = config.particle_capacity,
            width = layout.width(),
            height = layout.height(),
            padded = sorter.padded_len(),
            "simulation world allocated"
        );
        Ok(Self {
            layout,
            boundary: config.boundary,
            precision: config.precision,
            materials,
            particles: ParticleArrays::with_capacity(config.particle_capacity),
            sorter,
            spring_slots: SpringSlotAllocator::new(cells, config.max_springs_per_particle),
            springs: SpringStore::new(config.particle_capacity, config.max_springs_per_particle),
            bodies: RigidBodySet::default(),
            accumulator: CrossDomainAccumulator::new(0, config.precision),
            fluid: FluidRecords::new(cells, config.precision.fluid_record),
        })
    }

    /// Replace the rigid bodies (and resize the accumulator to match).
    pub fn set_bodies(&mut self, descs: &[RigidBodyDesc]) {
        self.bodies = RigidBodySet::from_descs(descs, &self.precision);
        self.accumulator = CrossDomainAccumulator::new(self.bodies.len(), self.precision);
    }

    /// Admit particles up to capacity; returns how many were taken.
    pub fn admit(&mut self, seeds: &[ParticleSeed]) -> usize {
        self.particles.admit(seeds)
    }

    /// Material of particle `i`.
    pub fn material_of(&self, i: usize) -> &ParticleMaterial {
        let t = self.particles.ptype[i] as usize;
        self.materials.get(t).unwrap_or(&self.materials[0])
    }
}

/// Implementation of the kernels whose math is not part of the pipeline.
///
/// The caller has already checked buffer validity and recorded the dispatch;
/// `lanes` is the lane count the dispatch was issued with.
pub trait SimulationKernels: Send {
    /// Run `kernel` over `lanes` lanes on `backend`.
    fn dispatch(
        &mut self,
        kernel: KernelId,
        lanes: usize,
        backend: &ExecBackend,
        world: &mut SimWorld,
        params: &StepParams,
    ) -> Result<(), DispatchError>;
}
