//! Scene construction: initial particles and rigid bodies.

use glam::Vec2;
use kernel::{GridError, ParticleSeed, SimWorld};

use crate::config::{FluidBlock, SimulationConfig};

/// Lattice columns and rows of `block`.
fn lattice_dims(block: &FluidBlock) -> (u32, u32) {
    let span = block.max - block.min;
    let count = |len: f32| ((len / block.spacing).floor().max(0.0) as u32).saturating_add(1);
    (count(span.x), count(span.y))
}

/// Number of lattice points in `block`.
pub fn block_len(block: &FluidBlock) -> u64 {
    let (nx, ny) = lattice_dims(block);
    u64::from(nx) * u64::from(ny)
}

/// Lattice points of `block`, row by row from `min`.
pub fn block_seeds(block: &FluidBlock) -> impl Iterator<Item = ParticleSeed> + '_ {
    let (nx, ny) = lattice_dims(block);
    (0..ny).flat_map(move |y| {
        (0..nx).map(move |x| ParticleSeed {
            pos: block.min + Vec2::new(x as f32, y as f32) * block.spacing,
            vel: block.velocity,
            ptype: block.particle_type,
        })
    })
}

/// Build the world for `config` with its initial scene loaded.
pub fn build_world(config: &SimulationConfig) -> Result<SimWorld, GridError> {
    let mut world = SimWorld::new(&config.world_config())?;
    world.set_bodies(&config.scene.rigid_bodies);

    let requested = config.scene.fluid_blocks.iter().map(block_len).fold(0u64, u64::saturating_add);
    let room = world.particles.capacity() - world.particles.len();
    let seeds: Vec<ParticleSeed> = config.scene.fluid_blocks.iter().flat_map(block_seeds).take(room).collect();
    let admitted = world.admit(&seeds);
    if (admitted as u64) < requested {
        tracing::warn!(
            requested,
            admitted,
            "scene particles exceed capacity; extra particles skipped"
        );
    }
    tracing::info!(
        name = %config.name,
        particles = admitted,
        rigid_bodies = world.bodies.len(),
        "scene loaded"
    );
    Ok(world)
}
