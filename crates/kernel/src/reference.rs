//! Reference CPU implementation of the opaque kernels.
//!
//! Simple double-density-relaxation style SPH, viscoelastic springs, and
//! disc-approximated rigid-body contacts. Good enough to drive the pipeline
//! end to end; not a validated solver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use glam::Vec2;

use crate::accumulator::{AccumulatorError, CrossDomainAccumulator};
use crate::dispatch::{DispatchError, ExecBackend, KernelId};
use crate::fixed_point::PrecisionTable;
use crate::kernels::{SimWorld, SimulationKernels, StepParams};
use crate::particle::ParticleMaterial;
use crate::rigid_body::{vertex_owner, RigidBody};
use crate::spatial::SENTINEL_KEY;
use crate::sph::{poly6, spiky_pow2, spiky_pow2_derivative, spiky_pow3, spiky_pow3_derivative};
use crate::springs::{fill_cell, Spring};

/// Densities below this are treated as this value when dividing.
const MIN_DENSITY: f32 = 1.0e-3;

/// Distances below this have no usable direction.
const MIN_DISTANCE: f32 = 1.0e-6;

/// Corrections the accumulator refused during one dispatch.
#[derive(Default)]
struct Rejections {
    first: OnceLock<AccumulatorError>,
    count: AtomicUsize,
}

impl Rejections {
    fn record(&self, result: Result<(), AccumulatorError>) {
        if let Err(e) = result {
            self.count.fetch_add(1, Ordering::Relaxed);
            // keep the first refusal only
            let _ = self.first.set(e);
        }
    }

    fn finish(self, kernel: KernelId) -> Result<(), DispatchError> {
        match self.first.into_inner() {
            None => Ok(()),
            Some(source) => {
                tracing::warn!(%kernel, rejected = self.count.into_inner(), "rigid-body corrections rejected");
                Err(DispatchError::Adjustment { kernel, source })
            }
        }
    }
}

#[inline]
fn material(materials: &[ParticleMaterial], ptype: u32) -> ParticleMaterial {
    materials
        .get(ptype as usize)
        .or(materials.first())
        .copied()
        .unwrap_or_default()
}

/// CPU kernels over [`SimWorld`] buffers.
#[derive(Debug, Clone)]
pub struct ReferenceKernels {
    /// Normal velocity kept after a wall or body contact.
    pub restitution: f32,
    /// Fraction of tangential relative velocity removed per particle contact.
    pub friction: f32,
    renders: u64,
    dropped_springs: u64,
}

impl Default for ReferenceKernels {
    fn default() -> Self {
        Self {
            restitution: 0.3,
            friction: 0.05,
            renders: 0,
            dropped_springs: 0,
        }
    }
}

impl ReferenceKernels {
    /// Number of `Render` dispatches seen.
    pub fn renders(&self) -> u64 {
        self.renders
    }

    /// Springs that did not fit their cell's capacity, summed over all steps.
    pub fn dropped_springs(&self) -> u64 {
        self.dropped_springs
    }
}

impl SimulationKernels for ReferenceKernels {
    fn dispatch(
        &mut self,
        kernel: KernelId,
        lanes: usize,
        backend: &ExecBackend,
        world: &mut SimWorld,
        params: &StepParams,
    ) -> Result<(), DispatchError> {
        let n = lanes.min(world.particles.len());
        match kernel {
            KernelId::PreCalculations => pre_calculations(backend, world, params, n),
            KernelId::CalculateDensities => calculate_densities(backend, world, n),
            KernelId::PrepSpringData => {
                backend.map_lanes(world.springs.new_half_mut(), |_, s| *s = Spring::EMPTY)
            }
            KernelId::TransferAllSpringData => {
                let dropped = transfer_springs(backend, world);
                if dropped > 0 {
                    tracing::warn!(dropped, "springs exceeded cell capacity");
                    self.dropped_springs += dropped as u64;
                }
            }
            KernelId::ParticleForces => particle_forces(backend, world, params, n),
            KernelId::SimulateRbRb => rigid_body_contacts(backend, world, self.restitution)?,
            KernelId::SimulateRbSprings => rigid_body_springs(backend, world, params)?,
            KernelId::AdjustRbDatas => rigid_body_walls(backend, world, self.restitution)?,
            KernelId::SimulateRbParticle => {
                rigid_body_particles(backend, world, params, n, self.restitution, self.friction)?
            }
            KernelId::ResetRbVertices | KernelId::UpdateRbVertices => update_vertices(backend, world),
            KernelId::UpdateRigidBodies => {
                let (dt, g, precision) = (params.rb_delta_time, params.gravity, world.precision);
                backend.map_lanes(&mut world.bodies.bodies, |_, b| b.integrate(dt, g, &precision));
            }
            KernelId::UpdatePositions => update_positions(backend, world, params, n, self.restitution),
            KernelId::Render => {
                self.renders += 1;
                tracing::trace!(frame_buffer = params.frame_buffer_cycle, "render");
            }
            other => return Err(DispatchError::Unsupported { kernel: other }),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Particle kernels
// ---------------------------------------------------------------------------

/// Store last velocity, apply gravity, predict positions.
fn pre_calculations(backend: &ExecBackend, world: &mut SimWorld, params: &StepParams, n: usize) {
    let (dt, g) = (params.delta_time, params.gravity);
    let p = &mut world.particles;

    let vel = &p.vel;
    backend.map_lanes(&mut p.last_vel[..n], |i, lv| *lv = vel[i]);
    backend.map_lanes(&mut p.vel[..n], |_, v| *v += g * dt);

    let (pos, vel) = (&p.pos, &p.vel);
    backend.map_lanes(&mut p.pred_pos[..n], |i, pp| *pp = pos[i] + vel[i] * dt);
}

fn calculate_densities(backend: &ExecBackend, world: &mut SimWorld, n: usize) {
    let r = world.layout.radius();
    let sorter = &world.sorter;
    let materials = &world.materials;
    let p = &mut world.particles;
    let (pred, ptype) = (&p.pred_pos, &p.ptype);

    let mut densities = vec![Vec2::ZERO; n];
    backend.map_lanes(&mut densities, |i, out| {
        let mut dens = Vec2::ZERO;
        sorter.for_each_neighbor(pred[i], r, pred, |j| {
            let d = pred[i].distance(pred[j]);
            let m = material(materials, ptype[j]).mass;
            dens.x += m * spiky_pow2(d, r);
            dens.y += m * spiky_pow3(d, r);
        });
        *out = dens;
    });
    backend.map_lanes(&mut p.density[..n], |i, d| *d = densities[i].x);
    backend.map_lanes(&mut p.near_density[..n], |i, d| *d = densities[i].y);
}

/// Rebuild every cell's springs into this step's half. Existing springs keep
/// their rest length, relaxed towards the current length by the plasticity.
fn transfer_springs(backend: &ExecBackend, world: &mut SimWorld) -> usize {
    let r = world.layout.radius();
    let max_springs = world.spring_slots.max_springs() as usize;
    let sorter = &world.sorter;
    let materials = &world.materials;
    let p = &world.particles;
    let dropped = AtomicUsize::new(0);

    let (mut cells, previous) = world.springs.split_cells();
    backend.map_lanes(&mut cells, |key, slots| {
        let last = previous[key];
        let mut made = Vec::new();
        for a in sorter.cell_particles(key as u32) {
            let mat = material(materials, p.ptype[a]);
            if mat.spring_stiffness <= 0.0 {
                continue;
            }
            let mut count = 0;
            sorter.for_each_neighbor(p.pos[a], r, &p.pos, |b| {
                if b <= a || count >= max_springs || p.ptype[b] != p.ptype[a] {
                    return;
                }
                let dist = p.pos[a].distance(p.pos[b]);
                let rest_length = last
                    .iter()
                    .find(|s| s.a == a as u32 && s.b == b as u32)
                    .map(|s| s.rest_length + mat.spring_plasticity * (dist - s.rest_length))
                    .unwrap_or(dist);
                made.push(Spring { a: a as u32, b: b as u32, rest_length, stiffness: mat.spring_stiffness });
                count += 1;
            });
        }
        let d = fill_cell(slots, made);
        if d > 0 {
            dropped.fetch_add(d, Ordering::Relaxed);
        }
    });
    dropped.into_inner()
}

fn particle_forces(backend: &ExecBackend, world: &mut SimWorld, params: &StepParams, n: usize) {
    let r = world.layout.radius();
    let dt = params.delta_time;
    let interaction = params.interaction;
    let (ir, strength) = (params.interaction_radius, params.interaction_strength);
    let springs_enabled = params.springs_enabled;
    let sorter = &world.sorter;
    let layout = &world.layout;
    let materials = &world.materials;
    let springs = &world.springs;
    let p = &mut world.particles;
    let (pred, dens, near, last_vel, ptype, keys) =
        (&p.pred_pos, &p.density, &p.near_density, &p.last_vel, &p.ptype, &p.last_cell_key);

    backend.map_lanes(&mut p.vel[..n], |i, v| {
        let mi = material(materials, ptype[i]);
        let rho_i = dens[i].max(MIN_DENSITY);
        let pressure_i = (dens[i] - mi.target_density) * mi.pressure_multiplier;
        let near_pressure_i = near[i] * mi.near_pressure_multiplier;

        let mut force = Vec2::ZERO;
        sorter.for_each_neighbor(pred[i], r, pred, |j| {
            if j == i {
                return;
            }
            let offset = pred[j] - pred[i];
            let d = offset.length();
            let dir = if d > MIN_DISTANCE { offset / d } else { Vec2::Y };
            let mj = material(materials, ptype[j]);
            let pressure_j = (dens[j] - mj.target_density) * mj.pressure_multiplier;
            let near_pressure_j = near[j] * mj.near_pressure_multiplier;
            let shared = 0.5 * (pressure_i + pressure_j);
            let shared_near = 0.5 * (near_pressure_i + near_pressure_j);
            force += dir * spiky_pow2_derivative(d, r) * shared / dens[j].max(MIN_DENSITY);
            force += dir * spiky_pow3_derivative(d, r) * shared_near / near[j].max(MIN_DENSITY);
            force += (last_vel[j] - last_vel[i]) * poly6(d, r) * mi.viscosity;
        });

        if springs_enabled && keys[i] != SENTINEL_KEY {
            for cell in layout.neighbourhood(keys[i]) {
                for s in springs.new_cell(cell) {
                    let other = if s.a as usize == i {
                        s.b as usize
                    } else if s.b as usize == i {
                        s.a as usize
                    } else {
                        continue;
                    };
                    if other >= n {
                        continue;
                    }
                    let offset = pred[other] - pred[i];
                    let d = offset.length();
                    if d > MIN_DISTANCE {
                        force += offset / d * s.stiffness * (d - s.rest_length);
                    }
                }
            }
        }

        let mut accel = force / rho_i;
        if interaction.left_pressed || interaction.right_pressed {
            let offset = interaction.pointer - pred[i];
            let d = offset.length();
            if d < ir && d > MIN_DISTANCE {
                let sign = if interaction.left_pressed { 1.0 } else { -1.0 };
                let falloff = 1.0 - d / ir;
                accel += (offset / d * strength * sign - *v) * falloff;
            }
        }
        *v += accel * dt;
    });
}

fn update_positions(backend: &ExecBackend, world: &mut SimWorld, params: &StepParams, n: usize, restitution: f32) {
    let dt = params.delta_time;
    let boundary = world.boundary;
    let p = &mut world.particles;

    let vel = &p.vel;
    backend.map_lanes(&mut p.pos[..n], |i, x| *x = (*x + vel[i] * dt).clamp(Vec2::ZERO, boundary));

    let pos = &p.pos;
    backend.map_lanes(&mut p.vel[..n], |i, v| {
        for axis in 0..2 {
            let out_low = pos[i][axis] <= 0.0 && v[axis] < 0.0;
            let out_high = pos[i][axis] >= boundary[axis] && v[axis] > 0.0;
            if out_low || out_high {
                v[axis] = -v[axis] * restitution;
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Rigid-body kernels
// ---------------------------------------------------------------------------

/// Body-vs-body overlap of bounding discs. Each lane only corrects its own body.
fn rigid_body_contacts(backend: &ExecBackend, world: &SimWorld, restitution: f32) -> Result<(), DispatchError> {
    let bodies = &world.bodies.bodies;
    let acc = &world.accumulator;
    let rejected = Rejections::default();
    let precision = world.precision;
    backend.for_each_lane(bodies.len(), |b| {
        let body = &bodies[b];
        if body.is_stationary() {
            return;
        }
        for (o, other) in bodies.iter().enumerate() {
            if o == b {
                continue;
            }
            let offset = body.pos - other.pos;
            let d = offset.length();
            let overlap = body.bounding_radius + other.bounding_radius - d;
            if overlap <= 0.0 || d < MIN_DISTANCE {
                continue;
            }
            let normal = offset / d;
            let share = if other.is_stationary() { 1.0 } else { 0.5 };
            let vn = (body.vel(&precision) - other.vel(&precision)).dot(normal);
            let dv = if vn < 0.0 { -normal * vn * (1.0 + restitution) * share } else { Vec2::ZERO };
            rejected.record(acc.accumulate(b, normal * overlap * share, dv, 0.0, Vec2::ZERO, Vec2::ZERO));
        }
    });
    rejected.finish(KernelId::SimulateRbRb)
}

/// Linked-body springs. The owning body's lane applies both ends.
fn rigid_body_springs(backend: &ExecBackend, world: &SimWorld, params: &StepParams) -> Result<(), DispatchError> {
    let bodies = &world.bodies.bodies;
    let acc = &world.accumulator;
    let rejected = Rejections::default();
    let dt = params.rb_delta_time;
    backend.for_each_lane(bodies.len(), |b| {
        let body = &bodies[b];
        let Some(o) = body.linked_body.map(|o| o as usize).filter(|&o| o < bodies.len() && o != b) else {
            return;
        };
        let other = &bodies[o];
        let offset = other.pos - body.pos;
        let d = offset.length();
        if d < MIN_DISTANCE {
            return;
        }
        let force = offset / d * body.spring_stiffness * (d - body.spring_rest_length);
        rejected.record(acc.accumulate(b, Vec2::ZERO, force * inverse_mass(body) * dt, 0.0, force, Vec2::ZERO));
        rejected.record(acc.accumulate(o, Vec2::ZERO, -force * inverse_mass(other) * dt, 0.0, -force, Vec2::ZERO));
    });
    rejected.finish(KernelId::SimulateRbSprings)
}

/// Keep bodies inside the simulation box.
fn rigid_body_walls(backend: &ExecBackend, world: &SimWorld, restitution: f32) -> Result<(), DispatchError> {
    let bodies = &world.bodies.bodies;
    let acc = &world.accumulator;
    let rejected = Rejections::default();
    let precision = world.precision;
    let boundary = world.boundary;
    backend.for_each_lane(bodies.len(), |b| {
        let body = &bodies[b];
        if body.is_stationary() {
            return;
        }
        let vel = body.vel(&precision);
        let mut dpos = Vec2::ZERO;
        let mut dvel = Vec2::ZERO;
        for axis in 0..2 {
            let lo = body.bounding_radius;
            let hi = (boundary[axis] - body.bounding_radius).max(lo);
            if body.pos[axis] < lo {
                dpos[axis] = lo - body.pos[axis];
                if vel[axis] < 0.0 {
                    dvel[axis] = -vel[axis] * (1.0 + restitution);
                }
            } else if body.pos[axis] > hi {
                dpos[axis] = hi - body.pos[axis];
                if vel[axis] > 0.0 {
                    dvel[axis] = -vel[axis] * (1.0 + restitution);
                }
            }
        }
        if dpos != Vec2::ZERO || dvel != Vec2::ZERO {
            rejected.record(acc.accumulate(b, dpos, dvel, 0.0, Vec2::ZERO, Vec2::ZERO));
        }
    });
    rejected.finish(KernelId::AdjustRbDatas)
}

/// Particle-vs-body contacts, one lane per particle. Every lane touching a
/// body adds its reaction into that body's slot.
fn rigid_body_particles(
    backend: &ExecBackend,
    world: &mut SimWorld,
    params: &StepParams,
    n: usize,
    restitution: f32,
    friction: f32,
) -> Result<(), DispatchError> {
    let dt = params.delta_time.max(MIN_DISTANCE);
    let rejected = Rejections::default();
    let bodies = &world.bodies.bodies;
    let acc: &CrossDomainAccumulator = &world.accumulator;
    let precision: PrecisionTable = world.precision;
    let materials = &world.materials;
    let p = &mut world.particles;
    let (pos, ptype) = (&p.pos, &p.ptype);

    backend.map_lanes(&mut p.vel[..n], |i, v| {
        let mass = material(materials, ptype[i]).mass;
        for (b, body) in bodies.iter().enumerate() {
            let lever = pos[i] - body.pos;
            let d = lever.length();
            let penetration = body.bounding_radius - d;
            if penetration <= 0.0 || d < MIN_DISTANCE {
                continue;
            }
            let normal = lever / d;
            let surface_vel = body.vel(&precision) + lever.perp() * body.rot_vel(&precision);
            let rel = *v - surface_vel;
            let vn = rel.dot(normal);

            let collision = if vn < 0.0 { -normal * vn * (1.0 + restitution) } else { Vec2::ZERO };
            let tangential = -(rel - normal * vn) * friction;
            *v += collision + tangential + normal * (penetration / dt);

            let impulse = -(collision + tangential) * mass;
            let inv_mass = inverse_mass(body);
            let inv_inertia = if body.inertia > 0.0 && !body.is_stationary() { 1.0 / body.inertia } else { 0.0 };
            rejected.record(acc.accumulate(
                b,
                Vec2::ZERO,
                impulse * inv_mass,
                lever.perp_dot(impulse) * inv_inertia,
                Vec2::ZERO,
                -tangential * mass / dt,
            ));
        }
    });
    rejected.finish(KernelId::SimulateRbParticle)
}

fn update_vertices(backend: &ExecBackend, world: &mut SimWorld) {
    let set = &mut world.bodies;
    let (bodies, local) = (&set.bodies, &set.local_vertices);
    backend.map_lanes(&mut set.world_vertices, |v, w| {
        if let Some(b) = vertex_owner(bodies, v) {
            *w = bodies[b].to_world(local[v]);
        }
    });
}

#[inline]
fn inverse_mass(body: &RigidBody) -> f32 {
    if body.is_stationary() {
        0.0
    } else {
        1.0 / body.mass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{BufferId, CommandQueue};
    use crate::kernels::WorldConfig;
    use crate::particle::ParticleSeed;
    use crate::rigid_body::RigidBodyDesc;

    fn world(capacity: usize) -> SimWorld {
        SimWorld::new(&WorldConfig {
            particle_capacity: capacity,
            max_springs_per_particle: 4,
            influence_radius: 1.0,
            boundary: Vec2::new(10.0, 10.0),
            precision: PrecisionTable::default(),
            materials: vec![ParticleMaterial { spring_stiffness: 5.0, ..Default::default() }],
        })
        .unwrap()
    }

    fn params(dt: f32) -> StepParams {
        StepParams { delta_time: dt, rb_delta_time: dt, gravity: Vec2::new(0.0, -10.0), ..Default::default() }
    }

    fn queue() -> CommandQueue {
        let mut q = CommandQueue::new(ExecBackend::Serial);
        q.mark_valid(BufferId::Particles);
        q
    }

    #[test]
    fn free_fall_step() {
        let mut w = world(4);
        w.admit(&[ParticleSeed::at(Vec2::new(5.0, 5.0))]);
        let mut k = ReferenceKernels::default();
        let b = ExecBackend::Serial;
        let p = params(0.1);
        k.dispatch(KernelId::PreCalculations, 1, &b, &mut w, &p).unwrap();
        assert_eq!(w.particles.last_vel[0], Vec2::ZERO);
        assert!((w.particles.vel[0].y + 1.0).abs() < 1e-6);
        k.dispatch(KernelId::UpdatePositions, 1, &b, &mut w, &p).unwrap();
        assert!((w.particles.pos[0].y - 4.9).abs() < 1e-5);
    }

    #[test]
    fn walls_reflect_particles() {
        let mut w = world(4);
        w.admit(&[ParticleSeed { pos: Vec2::new(0.05, 5.0), vel: Vec2::new(-2.0, 0.0), ptype: 0 }]);
        let mut k = ReferenceKernels::default();
        k.dispatch(KernelId::UpdatePositions, 1, &ExecBackend::Serial, &mut w, &params(0.1)).unwrap();
        assert_eq!(w.particles.pos[0].x, 0.0);
        assert!(w.particles.vel[0].x > 0.0);
    }

    #[test]
    fn densities_include_self() {
        let mut w = world(4);
        w.admit(&[ParticleSeed::at(Vec2::new(5.0, 5.0)), ParticleSeed::at(Vec2::new(5.5, 5.0))]);
        let mut q = queue();
        w.sorter.run(&mut q, &mut w.particles).unwrap();
        let mut k = ReferenceKernels::default();
        let b = ExecBackend::Serial;
        let p = StepParams::default();
        k.dispatch(KernelId::PreCalculations, 2, &b, &mut w, &p).unwrap();
        k.dispatch(KernelId::CalculateDensities, 2, &b, &mut w, &p).unwrap();
        let expected = spiky_pow2(0.0, 1.0) + spiky_pow2(0.5, 1.0);
        assert!((w.particles.density[0] - expected).abs() < 1e-5);
        assert_eq!(w.particles.density[0], w.particles.density[1]);
    }

    #[test]
    fn springs_link_close_pairs_once() {
        let mut w = world(8);
        w.admit(&[
            ParticleSeed::at(Vec2::new(5.1, 5.1)),
            ParticleSeed::at(Vec2::new(5.4, 5.1)),
            ParticleSeed::at(Vec2::new(8.5, 8.5)),
        ]);
        let mut q = queue();
        w.sorter.run(&mut q, &mut w.particles).unwrap();
        w.spring_slots.run(&mut q, &w.sorter).unwrap();
        w.springs.swap_halves(&w.spring_slots);

        let mut k = ReferenceKernels::default();
        let b = ExecBackend::Serial;
        let p = StepParams::default();
        let half = w.springs.half_len();
        k.dispatch(KernelId::PrepSpringData, half, &b, &mut w, &p).unwrap();
        k.dispatch(KernelId::TransferAllSpringData, half, &b, &mut w, &p).unwrap();
        assert_eq!(w.springs.linked_count(), 1);
        assert_eq!(k.dropped_springs(), 0);
        let cell = w.layout.key_of(Vec2::new(5.1, 5.1));
        let s = w.springs.new_cell(cell)[0];
        assert_eq!((s.a, s.b), (0, 1));
        assert!((s.rest_length - 0.3).abs() < 1e-5);
    }

    #[test]
    fn particle_contact_pushes_body() {
        let mut w = world(4);
        w.set_bodies(&[RigidBodyDesc {
            pos: Vec2::new(5.0, 5.0),
            vel: Vec2::ZERO,
            rot_vel: 0.0,
            mass: 10.0,
            vertices: vec![Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(-1.0, 0.0), Vec2::new(0.0, -1.0)],
            linked_body: None,
            spring_rest_length: 0.0,
            spring_stiffness: 0.0,
        }]);
        // particle inside the body's disc, moving into it from above
        w.admit(&[ParticleSeed { pos: Vec2::new(5.0, 5.9), vel: Vec2::new(0.0, -3.0), ptype: 0 }]);
        let mut q = queue();
        q.mark_valid(BufferId::RigidBodies);
        w.accumulator.reset_all(&mut q).unwrap();

        let mut k = ReferenceKernels::default();
        k.dispatch(KernelId::SimulateRbParticle, 1, &ExecBackend::Serial, &mut w, &params(0.01)).unwrap();
        assert!(w.particles.vel[0].y > 0.0);
        let adj = w.accumulator.snapshot(0).unwrap();
        assert!(adj.delta_vel[1] < 0, "body pushed downwards: {adj:?}");
    }

    #[test]
    fn refused_corrections_fail_the_dispatch() {
        let mut w = world(4);
        w.set_bodies(&[RigidBodyDesc {
            pos: Vec2::new(0.2, 5.0),
            vel: Vec2::new(-1.0, 0.0),
            rot_vel: 0.0,
            mass: 10.0,
            vertices: vec![Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(-1.0, 0.0), Vec2::new(0.0, -1.0)],
            linked_body: None,
            spring_rest_length: 0.0,
            spring_stiffness: 0.0,
        }]);
        // slot table out of step with the body set
        w.accumulator = CrossDomainAccumulator::new(0, w.precision);

        let mut k = ReferenceKernels::default();
        let err = k.dispatch(KernelId::AdjustRbDatas, 1, &ExecBackend::Serial, &mut w, &params(0.01)).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Adjustment {
                kernel: KernelId::AdjustRbDatas,
                source: AccumulatorError::UnknownBody { body: 0, count: 0 },
            }
        );
    }

    #[test]
    fn unsupported_kernel_is_refused() {
        let mut w = world(4);
        let mut k = ReferenceKernels::default();
        let err = k
            .dispatch(KernelId::SortIteration, 1, &ExecBackend::Serial, &mut w, &StepParams::default())
            .unwrap_err();
        assert_eq!(err, DispatchError::Unsupported { kernel: KernelId::SortIteration });
    }

    #[test]
    fn render_counts() {
        let mut w = world(4);
        let mut k = ReferenceKernels::default();
        k.dispatch(KernelId::Render, 0, &ExecBackend::Serial, &mut w, &StepParams::default()).unwrap();
        assert_eq!(k.renders(), 1);
    }
}
