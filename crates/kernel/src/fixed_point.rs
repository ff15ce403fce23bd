//! Fixed-point encoding for race-free parallel accumulation.
//!
//! Many lanes add corrections into the same rigid body or grid cell within a
//! single dispatch. Integer addition is exact and order independent (and maps
//! onto hardware atomic-add), floating-point addition is neither. Values are
//! therefore scaled by a per-domain precision and rounded to `i32` before
//! they are summed.
//!
//! Overflow is **not** checked. The precision for each domain must be chosen
//! so that the largest expected accumulated magnitude times the precision
//! stays inside `i32`.

use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

/// Encode `value` with `precision` units per 1.0.
#[inline]
pub fn to_fixed(value: f32, precision: f32) -> i32 {
    (value * precision).round() as i32
}

/// Decode a value produced by [`to_fixed`].
#[inline]
pub fn from_fixed(value: i32, precision: f32) -> f32 {
    value as f32 / precision
}

/// Component-wise [`to_fixed`].
#[inline]
pub fn to_fixed2(value: Vec2, precision: f32) -> IVec2 {
    IVec2::new(to_fixed(value.x, precision), to_fixed(value.y, precision))
}

/// Component-wise [`from_fixed`].
#[inline]
pub fn from_fixed2(value: IVec2, precision: f32) -> Vec2 {
    Vec2::new(from_fixed(value.x, precision), from_fixed(value.y, precision))
}

/// Quantity families that are accumulated in fixed point. Each has its own
/// magnitude / resolution trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrecisionDomain {
    /// Particle position and velocity corrections.
    Particle,
    /// Rigid-body position, velocity and recorded forces.
    RigidBody,
    /// Rigid-body rotational velocity (radians / second).
    RigidBodyRotation,
    /// Per-cell fluid measurements.
    FluidRecord,
}

/// Precision per [`PrecisionDomain`], kept as configuration data so it can be
/// tuned (or swept by tests) without touching the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionTable {
    /// Units per 1.0 for [`PrecisionDomain::Particle`].
    #[serde(default = "default_particle")]
    pub particle: f32,
    /// Units per 1.0 for [`PrecisionDomain::RigidBody`].
    #[serde(default = "default_rigid_body")]
    pub rigid_body: f32,
    /// Units per 1.0 for [`PrecisionDomain::RigidBodyRotation`].
    #[serde(default = "default_rigid_body_rotation")]
    pub rigid_body_rotation: f32,
    /// Units per 1.0 for [`PrecisionDomain::FluidRecord`].
    #[serde(default = "default_fluid_record")]
    pub fluid_record: f32,
}

fn default_particle() -> f32 {
    1_000.0
}

fn default_rigid_body() -> f32 {
    50_000.0
}

fn default_rigid_body_rotation() -> f32 {
    500_000.0
}

fn default_fluid_record() -> f32 {
    1_000.0
}

impl Default for PrecisionTable {
    fn default() -> Self {
        Self {
            particle: default_particle(),
            rigid_body: default_rigid_body(),
            rigid_body_rotation: default_rigid_body_rotation(),
            fluid_record: default_fluid_record(),
        }
    }
}

impl PrecisionTable {
    /// Precision used for `domain`.
    pub fn get(&self, domain: PrecisionDomain) -> f32 {
        match domain {
            PrecisionDomain::Particle => self.particle,
            PrecisionDomain::RigidBody => self.rigid_body,
            PrecisionDomain::RigidBodyRotation => self.rigid_body_rotation,
            PrecisionDomain::FluidRecord => self.fluid_record,
        }
    }

    /// Same precision for every domain.
    pub fn uniform(precision: f32) -> Self {
        Self {
            particle: precision,
            rigid_body: precision,
            rigid_body_rotation: precision,
            fluid_record: precision,
        }
    }

    /// Iterate `(domain, precision)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (PrecisionDomain, f32)> + '_ {
        [
            PrecisionDomain::Particle,
            PrecisionDomain::RigidBody,
            PrecisionDomain::RigidBodyRotation,
            PrecisionDomain::FluidRecord,
        ]
        .into_iter()
        .map(move |d| (d, self.get(d)))
    }
}
