//! Rigid bodies: polygonal, 2D, coupled to the fluid through the
//! cross-domain accumulator.
//!
//! Velocity and rotational velocity are held in fixed point so corrections
//! accumulated by many lanes apply without rounding drift. Position and total
//! rotation stay in float.

use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::accumulator::RbAdjustment;
use crate::fixed_point::{from_fixed, from_fixed2, to_fixed, to_fixed2, PrecisionTable};

/// Description of a rigid body, as read from a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyDesc {
    /// Centre of mass.
    pub pos: Vec2,
    /// Initial velocity.
    #[serde(default)]
    pub vel: Vec2,
    /// Initial rotational velocity (radians / second).
    #[serde(default)]
    pub rot_vel: f32,
    /// Mass; 0 makes the body stationary.
    #[serde(default)]
    pub mass: f32,
    /// Polygon vertices relative to `pos`.
    pub vertices: Vec<Vec2>,
    /// Body this one is tied to by a spring.
    #[serde(default)]
    pub linked_body: Option<u32>,
    /// Rest length of the link spring.
    #[serde(default)]
    pub spring_rest_length: f32,
    /// Stiffness of the link spring.
    #[serde(default)]
    pub spring_stiffness: f32,
}

/// Simulated state of one rigid body.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    /// Centre of mass.
    pub pos: Vec2,
    /// Velocity, fixed point in the rigid-body domain.
    pub vel_fixed: IVec2,
    /// Rotational velocity, fixed point in the rotation domain.
    pub rot_vel_fixed: i32,
    /// Accumulated rotation (radians).
    pub total_rotation: f32,
    /// Mass; 0 = stationary.
    pub mass: f32,
    /// Moment of inertia around the centre of mass.
    pub inertia: f32,
    /// Bounding radius of the vertex polygon.
    pub bounding_radius: f32,
    /// First vertex in the shared vertex buffer.
    pub vertex_start: u32,
    /// One past the last vertex.
    pub vertex_end: u32,
    /// Spring-linked body.
    pub linked_body: Option<u32>,
    /// Link spring rest length.
    pub spring_rest_length: f32,
    /// Link spring stiffness.
    pub spring_stiffness: f32,
    /// Spring force recorded by the last consumed adjustment.
    pub recorded_spring_force: Vec2,
    /// Friction force recorded by the last consumed adjustment.
    pub recorded_friction_force: Vec2,
}

impl RigidBody {
    /// Whether the body never moves.
    #[inline]
    pub fn is_stationary(&self) -> bool {
        self.mass <= 0.0
    }

    /// Decoded velocity.
    pub fn vel(&self, precision: &PrecisionTable) -> Vec2 {
        from_fixed2(self.vel_fixed, precision.rigid_body)
    }

    /// Decoded rotational velocity.
    pub fn rot_vel(&self, precision: &PrecisionTable) -> f32 {
        from_fixed(self.rot_vel_fixed, precision.rigid_body_rotation)
    }

    /// Encode and store a velocity.
    pub fn set_vel(&mut self, vel: Vec2, precision: &PrecisionTable) {
        self.vel_fixed = to_fixed2(vel, precision.rigid_body);
    }

    /// Encode and store a rotational velocity.
    pub fn set_rot_vel(&mut self, rot_vel: f32, precision: &PrecisionTable) {
        self.rot_vel_fixed = to_fixed(rot_vel, precision.rigid_body_rotation);
    }

    /// Apply one consumed adjustment. Stationary bodies keep their state but
    /// still record the force samples.
    pub fn apply_adjustment(&mut self, adj: &RbAdjustment, precision: &PrecisionTable) {
        self.recorded_spring_force = from_fixed2(adj.recorded_spring_force(), precision.rigid_body);
        self.recorded_friction_force = from_fixed2(adj.recorded_friction_force(), precision.rigid_body);
        if self.is_stationary() {
            return;
        }
        self.pos += from_fixed2(adj.delta_pos(), precision.rigid_body);
        self.vel_fixed += adj.delta_vel();
        self.rot_vel_fixed += adj.delta_rot_vel;
    }

    /// Advance by `dt` under `gravity`.
    pub fn integrate(&mut self, dt: f32, gravity: Vec2, precision: &PrecisionTable) {
        if self.is_stationary() {
            return;
        }
        let vel = self.vel(precision) + gravity * dt;
        self.set_vel(vel, precision);
        self.pos += vel * dt;
        self.total_rotation += self.rot_vel(precision) * dt;
    }

    /// World-space position of a body-local vertex.
    #[inline]
    pub fn to_world(&self, local: Vec2) -> Vec2 {
        self.pos + Vec2::from_angle(self.total_rotation).rotate(local)
    }
}

/// All rigid bodies plus their shared vertex buffers.
#[derive(Debug, Clone, Default)]
pub struct RigidBodySet {
    /// Body state.
    pub bodies: Vec<RigidBody>,
    /// Vertices relative to their body's centre.
    pub local_vertices: Vec<Vec2>,
    /// Vertices in world space, refreshed by the vertex kernels.
    pub world_vertices: Vec<Vec2>,
}

impl RigidBodySet {
    /// Build bodies from descriptions. Inertia is estimated from the polygon
    /// as that of a disc with the mean vertex distance.
    pub fn from_descs(descs: &[RigidBodyDesc], precision: &PrecisionTable) -> Self {
        let mut set = Self::default();
        for desc in descs {
            let start = set.local_vertices.len() as u32;
            set.local_vertices.extend_from_slice(&desc.vertices);
            let end = set.local_vertices.len() as u32;

            let n = desc.vertices.len().max(1) as f32;
            let mean_r2 = desc.vertices.iter().map(|v| v.length_squared()).sum::<f32>() / n;
            let bounding_radius = desc.vertices.iter().map(|v| v.length()).fold(0.0, f32::max);

            let mut body = RigidBody {
                pos: desc.pos,
                vel_fixed: IVec2::ZERO,
                rot_vel_fixed: 0,
                total_rotation: 0.0,
                mass: desc.mass.max(0.0),
                inertia: 0.5 * desc.mass.max(0.0) * mean_r2,
                bounding_radius,
                vertex_start: start,
                vertex_end: end,
                linked_body: desc.linked_body,
                spring_rest_length: desc.spring_rest_length,
                spring_stiffness: desc.spring_stiffness,
                recorded_spring_force: Vec2::ZERO,
                recorded_friction_force: Vec2::ZERO,
            };
            body.set_vel(desc.vel, precision);
            body.set_rot_vel(desc.rot_vel, precision);
            set.bodies.push(body);
        }
        set.world_vertices = vec![Vec2::ZERO; set.local_vertices.len()];
        for body in &set.bodies {
            for v in body.vertex_start..body.vertex_end {
                set.world_vertices[v as usize] = body.to_world(set.local_vertices[v as usize]);
            }
        }
        set
    }

    /// Number of bodies.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Return `true` if there are no bodies.
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Index of the body owning vertex `v`.
    pub fn owner_of_vertex(&self, v: usize) -> Option<usize> {
        vertex_owner(&self.bodies, v)
    }
}

/// Index of the body owning vertex `v`. Vertex ranges are laid out in body order.
pub fn vertex_owner(bodies: &[RigidBody], v: usize) -> Option<usize> {
    let v = v as u32;
    let b = bodies.partition_point(|b| b.vertex_end <= v);
    bodies
        .get(b)
        .filter(|body| (body.vertex_start..body.vertex_end).contains(&v))
        .map(|_| b)
}
