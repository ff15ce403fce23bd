//! Particle data structures using struct-of-arrays layout for parallel lanes.
//!
//! Storage is allocated once for the configured capacity. Only the first
//! `active` slots take part in the simulation; slots are never freed
//! individually, the population only grows by admission or shrinks by
//! lowering the active count.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Per-type material parameters used by the fluid kernels and the per-cell
/// fluid measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleMaterial {
    /// Particle mass.
    #[serde(default = "default_mass")]
    pub mass: f32,
    /// Rest density the pressure term drives towards. The default is the
    /// density of a square lattice with spacing 0.67 at influence radius 1.
    #[serde(default = "default_target_density")]
    pub target_density: f32,
    /// Pressure stiffness.
    #[serde(default = "default_pressure_multiplier")]
    pub pressure_multiplier: f32,
    /// Near-pressure stiffness (anti-clustering term).
    #[serde(default = "default_near_pressure_multiplier")]
    pub near_pressure_multiplier: f32,
    /// Linear viscosity coefficient.
    #[serde(default = "default_viscosity")]
    pub viscosity: f32,
    /// Stiffness of springs between particles of this type (0 = no springs).
    #[serde(default)]
    pub spring_stiffness: f32,
    /// Fraction of the spring deformation absorbed into the rest length each step.
    #[serde(default)]
    pub spring_plasticity: f32,
}

fn default_mass() -> f32 {
    1.0
}

fn default_target_density() -> f32 {
    2.75
}

fn default_pressure_multiplier() -> f32 {
    3000.0
}

fn default_near_pressure_multiplier() -> f32 {
    12.0
}

fn default_viscosity() -> f32 {
    1.5
}

impl Default for ParticleMaterial {
    fn default() -> Self {
        Self {
            mass: default_mass(),
            target_density: default_target_density(),
            pressure_multiplier: default_pressure_multiplier(),
            near_pressure_multiplier: default_near_pressure_multiplier(),
            viscosity: default_viscosity(),
            spring_stiffness: 0.0,
            spring_plasticity: 0.0,
        }
    }
}

/// A particle waiting to be admitted into the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleSeed {
    /// Initial position.
    pub pos: Vec2,
    /// Initial velocity.
    #[serde(default)]
    pub vel: Vec2,
    /// Material / type index.
    #[serde(default)]
    pub ptype: u32,
}

impl ParticleSeed {
    /// Seed at rest with type 0.
    pub fn at(pos: Vec2) -> Self {
        Self { pos, vel: Vec2::ZERO, ptype: 0 }
    }
}

/// Struct-of-arrays particle storage.
///
/// All arrays are parallel and `capacity` long: index `i` across every array
/// refers to the same particle slot.
#[derive(Debug, Clone)]
pub struct ParticleArrays {
    capacity: usize,
    active: usize,

    // ---- Kinematics ----
    /// Positions.
    pub pos: Vec<Vec2>,
    /// Predicted positions for the current sub-step.
    pub pred_pos: Vec<Vec2>,
    /// Velocities.
    pub vel: Vec<Vec2>,
    /// Velocity at the start of the current sub-step.
    pub last_vel: Vec<Vec2>,

    // ---- Scalar fields ----
    /// Density.
    pub density: Vec<f32>,
    /// Near density.
    pub near_density: Vec<f32>,
    /// Material / type index.
    pub ptype: Vec<u32>,
    /// Cell key written by the last spatial sort.
    pub last_cell_key: Vec<u32>,
}

impl ParticleArrays {
    /// Allocate storage for `capacity` particles, none active.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            active: 0,
            pos: vec![Vec2::ZERO; capacity],
            pred_pos: vec![Vec2::ZERO; capacity],
            vel: vec![Vec2::ZERO; capacity],
            last_vel: vec![Vec2::ZERO; capacity],
            density: vec![0.0; capacity],
            near_density: vec![0.0; capacity],
            ptype: vec![0; capacity],
            last_cell_key: vec![u32::MAX; capacity],
        }
    }

    /// Total slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active particles.
    pub fn len(&self) -> usize {
        self.active
    }

    /// Return `true` if there are no active particles.
    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Slots still free for admission.
    pub fn remaining(&self) -> usize {
        self.capacity - self.active
    }

    /// Admit as many of `seeds` as fit, in order. Returns how many were taken.
    pub fn admit(&mut self, seeds: &[ParticleSeed]) -> usize {
        let n = seeds.len().min(self.remaining());
        for seed in &seeds[..n] {
            let i = self.active;
            self.pos[i] = seed.pos;
            self.pred_pos[i] = seed.pos;
            self.vel[i] = seed.vel;
            self.last_vel[i] = seed.vel;
            self.density[i] = 0.0;
            self.near_density[i] = 0.0;
            self.ptype[i] = seed.ptype;
            self.last_cell_key[i] = u32::MAX;
            self.active += 1;
        }
        n
    }

    /// Exclude every slot at or beyond `active`. Growing is not possible here;
    /// use [`ParticleArrays::admit`].
    pub fn truncate(&mut self, active: usize) {
        self.active = self.active.min(active);
    }

    /// Drop every particle.
    pub fn clear(&mut self) {
        self.active = 0;
    }
}
