//! Per-cell fluid measurements for sensor collaborators.
//!
//! Particles add their mass, velocity and pressure into the cell they were
//! sorted into. Totals are fixed point so the per-cell sums are exact under
//! any lane order.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use glam::Vec2;

use crate::dispatch::{BufferId, CommandQueue, DispatchError, KernelId};
use crate::fixed_point::{from_fixed, to_fixed};
use crate::particle::{ParticleArrays, ParticleMaterial};
use crate::spatial::SENTINEL_KEY;

#[derive(Debug, Default)]
struct CellRecord {
    mass: AtomicI32,
    vel: [AtomicI32; 2],
    pressure: AtomicI32,
    contributions: AtomicU32,
}

/// Decoded totals of one cell.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellMeasurement {
    /// Summed particle mass.
    pub total_mass: f32,
    /// Summed particle velocity.
    pub total_velocity: Vec2,
    /// Summed particle pressure.
    pub total_pressure: f32,
    /// Number of contributing particles.
    pub contributions: u32,
}

impl CellMeasurement {
    /// Multiply every total by `factor` (e.g. `1 / samples` for an average
    /// over several frames). The contribution count is left as is.
    pub fn scale(&mut self, factor: f32) {
        self.total_mass *= factor;
        self.total_velocity *= factor;
        self.total_pressure *= factor;
    }

    /// Mean velocity of the contributing particles.
    pub fn average_velocity(&self) -> Vec2 {
        if self.contributions == 0 {
            Vec2::ZERO
        } else {
            self.total_velocity / self.contributions as f32
        }
    }
}

/// Fixed-point totals for every grid cell.
#[derive(Debug)]
pub struct FluidRecords {
    cells: Vec<CellRecord>,
    precision: f32,
}

impl FluidRecords {
    /// Records for `cells` cells, encoded with `precision`.
    pub fn new(cells: usize, precision: f32) -> Self {
        Self {
            cells: (0..cells).map(|_| CellRecord::default()).collect(),
            precision,
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Return `true` if there are no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// `ResetFluidData`: one lane per cell.
    pub fn reset(&self, queue: &mut CommandQueue) -> Result<(), DispatchError> {
        let backend = queue.issue(KernelId::ResetFluidData, self.cells.len())?;
        backend.for_each_lane(self.cells.len(), |k| {
            let c = &self.cells[k];
            c.mass.store(0, Ordering::Relaxed);
            c.vel[0].store(0, Ordering::Relaxed);
            c.vel[1].store(0, Ordering::Relaxed);
            c.pressure.store(0, Ordering::Relaxed);
            c.contributions.store(0, Ordering::Relaxed);
        });
        queue.mark_valid(BufferId::FluidRecords);
        Ok(())
    }

    /// Add one particle's sample to cell `key`.
    ///
    /// Totals are `i32` fixed point and wrap silently on overflow. Each
    /// cell's summed mass, velocity component and pressure must stay below
    /// `i32::MAX / precision` in magnitude (about 2.1e6 at the default
    /// precision of 1000). Scenes with dense cells or large pressures need a
    /// smaller `fluid_record` precision.
    pub fn record(&self, key: u32, mass: f32, vel: Vec2, pressure: f32) {
        let Some(c) = self.cells.get(key as usize) else {
            return;
        };
        let p = self.precision;
        c.mass.fetch_add(to_fixed(mass, p), Ordering::Relaxed);
        c.vel[0].fetch_add(to_fixed(vel.x, p), Ordering::Relaxed);
        c.vel[1].fetch_add(to_fixed(vel.y, p), Ordering::Relaxed);
        c.pressure.fetch_add(to_fixed(pressure, p), Ordering::Relaxed);
        c.contributions.fetch_add(1, Ordering::Relaxed);
    }

    /// `RecordFluidData`: one lane per active particle, keyed by the cell of
    /// the last sort.
    pub fn record_particles(
        &self,
        queue: &mut CommandQueue,
        particles: &ParticleArrays,
        materials: &[ParticleMaterial],
    ) -> Result<(), DispatchError> {
        let backend = queue.issue(KernelId::RecordFluidData, particles.len())?;
        backend.for_each_lane(particles.len(), |i| {
            let key = particles.last_cell_key[i];
            if key == SENTINEL_KEY {
                return;
            }
            let mat = materials.get(particles.ptype[i] as usize).copied().unwrap_or_default();
            let pressure = (particles.density[i] - mat.target_density) * mat.pressure_multiplier;
            self.record(key, mat.mass, particles.vel[i], pressure);
        });
        Ok(())
    }

    /// Decoded totals of cell `key`.
    pub fn measurement(&self, key: u32) -> Option<CellMeasurement> {
        let c = self.cells.get(key as usize)?;
        let p = self.precision;
        Some(CellMeasurement {
            total_mass: from_fixed(c.mass.load(Ordering::Relaxed), p),
            total_velocity: Vec2::new(
                from_fixed(c.vel[0].load(Ordering::Relaxed), p),
                from_fixed(c.vel[1].load(Ordering::Relaxed), p),
            ),
            total_pressure: from_fixed(c.pressure.load(Ordering::Relaxed), p),
            contributions: c.contributions.load(Ordering::Relaxed),
        })
    }

    /// Decoded totals of every cell.
    pub fn measurements(&self) -> Vec<CellMeasurement> {
        (0..self.cells.len() as u32).filter_map(|k| self.measurement(k)).collect()
    }
}
