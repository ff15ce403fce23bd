//! Uniform-grid spatial index built with a parallel bitonic sort.
//!
//! Every particle slot gets a `(cell_key, index)` lookup entry. The lookup is
//! padded to a power of two with sentinel keys that sort last, then sorted by
//! a fixed, data-independent network of compare-exchange passes. A final pass
//! marks the first slot of every key in a dense start table, so the particles
//! of cell `k` are the contiguous run of the lookup beginning at
//! `start_indices[k]`.
//!
//! Uses sorted-index + start arrays rather than `HashMap` so the data layout
//! maps directly onto compute buffers (no pointer chasing).

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec2};

use crate::dispatch::{next_pow2, BufferId, CommandQueue, DispatchError, KernelId};
use crate::particle::ParticleArrays;

/// Cell key carried by padding and inactive slots. Sorts after every real key.
pub const SENTINEL_KEY: u32 = u32::MAX;

/// Start-table value of a cell that holds no particle.
pub const EMPTY_START: u32 = u32::MAX;

/// Invalid grid parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    /// Influence radius must be finite and positive.
    #[error("influence radius must be positive and finite, got {0}")]
    InvalidRadius(f32),
    /// Boundary must be finite and positive on both axes.
    #[error("boundary must be positive and finite, got ({0}, {1})")]
    InvalidBoundary(f32, f32),
    /// Particle capacity of zero.
    #[error("particle capacity must be at least 1")]
    ZeroCapacity,
    /// Too many cells to key with `u32` next to the sentinel.
    #[error("grid of {width}x{height} cells exceeds the addressable key range")]
    TooManyCells {
        /// Cells along x.
        width: u32,
        /// Cells along y.
        height: u32,
    },
}

/// Dense 2D grid over `[0, boundary]` with square cells of the influence radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    radius: f32,
    width: u32,
    height: u32,
}

impl GridLayout {
    /// Grid covering `boundary`: `floor(boundary / radius)` cells per axis, at least 1.
    pub fn new(boundary: Vec2, radius: f32) -> Result<Self, GridError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(GridError::InvalidRadius(radius));
        }
        if !(boundary.is_finite() && boundary.x > 0.0 && boundary.y > 0.0) {
            return Err(GridError::InvalidBoundary(boundary.x, boundary.y));
        }
        let dims = (boundary / radius).floor().max(Vec2::ONE);
        if dims.x > u32::MAX as f32 || dims.y > u32::MAX as f32 {
            return Err(GridError::TooManyCells { width: u32::MAX, height: u32::MAX });
        }
        Self::with_dims(dims.x as u32, dims.y as u32, radius)
    }

    /// Grid with explicit dimensions.
    pub fn with_dims(width: u32, height: u32, radius: f32) -> Result<Self, GridError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(GridError::InvalidRadius(radius));
        }
        let cells = width as u64 * height as u64;
        if width == 0 || height == 0 || cells >= SENTINEL_KEY as u64 {
            return Err(GridError::TooManyCells { width, height });
        }
        Ok(Self { radius, width, height })
    }

    /// Cell edge length.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Cells along x.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Cells along y.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Cell of `pos`, clamped to the grid.
    #[inline]
    pub fn cell_of(&self, pos: Vec2) -> UVec2 {
        let c = (pos / self.radius).floor();
        UVec2::new(
            c.x.clamp(0.0, (self.width - 1) as f32) as u32,
            c.y.clamp(0.0, (self.height - 1) as f32) as u32,
        )
    }

    /// `x + y * width`.
    #[inline]
    pub fn key(&self, cell: UVec2) -> u32 {
        cell.x + cell.y * self.width
    }

    /// Key of the cell containing `pos`.
    #[inline]
    pub fn key_of(&self, pos: Vec2) -> u32 {
        self.key(self.cell_of(pos))
    }

    /// Inverse of [`GridLayout::key`].
    #[inline]
    pub fn cell_xy(&self, key: u32) -> UVec2 {
        UVec2::new(key % self.width, key / self.width)
    }

    /// Keys of the 3x3 block around `key`, clipped to the grid.
    pub fn neighbourhood(&self, key: u32) -> impl Iterator<Item = u32> + '_ {
        let c = self.cell_xy(key).as_ivec2();
        (-1..=1).flat_map(move |dy| {
            (-1..=1).filter_map(move |dx| {
                let x = c.x + dx;
                let y = c.y + dy;
                let inside = x >= 0 && y >= 0 && x < self.width as i32 && y < self.height as i32;
                inside.then(|| x as u32 + y as u32 * self.width)
            })
        })
    }
}

/// One slot of the spatial lookup.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct LookupEntry {
    /// Cell key, or [`SENTINEL_KEY`].
    pub key: u32,
    /// Particle slot.
    pub index: u32,
}

impl LookupEntry {
    /// Whether this entry stands for a real particle.
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.key == SENTINEL_KEY
    }
}

/// Sorted spatial lookup plus per-cell start table.
#[derive(Debug)]
pub struct SpatialHashSorter {
    layout: GridLayout,
    lookup: Vec<LookupEntry>,
    start_indices: Vec<AtomicU32>,
}

impl SpatialHashSorter {
    /// Lookup sized for `capacity` particles (padded to a power of two).
    pub fn new(layout: GridLayout, capacity: usize) -> Result<Self, GridError> {
        if capacity == 0 {
            return Err(GridError::ZeroCapacity);
        }
        let padded = next_pow2(capacity);
        let lookup = (0..padded)
            .map(|i| LookupEntry { key: SENTINEL_KEY, index: i as u32 })
            .collect();
        let start_indices = (0..layout.cell_count()).map(|_| AtomicU32::new(EMPTY_START)).collect();
        Ok(Self { layout, lookup, start_indices })
    }

    /// Grid the index is built over.
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Length of the padded lookup.
    pub fn padded_len(&self) -> usize {
        self.lookup.len()
    }

    /// Rebuild the index from the active particles.
    ///
    /// Returns `false` without dispatching anything when there are no active
    /// particles; the lookup and start table are then marked stale.
    pub fn run(
        &mut self,
        queue: &mut CommandQueue,
        particles: &mut ParticleArrays,
    ) -> Result<bool, DispatchError> {
        queue.mark_stale(BufferId::SpatialLookup);
        queue.mark_stale(BufferId::StartIndices);
        if particles.is_empty() {
            return Ok(false);
        }
        self.calculate_cell_keys(queue, particles)?;
        self.sort(queue)?;
        queue.mark_valid(BufferId::SpatialLookup);
        self.reset_start_indices(queue)?;
        self.populate_start_indices(queue)?;
        queue.mark_valid(BufferId::StartIndices);
        Ok(true)
    }

    /// `CalculateChunkKeys`: one lane per padded slot.
    pub fn calculate_cell_keys(
        &mut self,
        queue: &mut CommandQueue,
        particles: &mut ParticleArrays,
    ) -> Result<(), DispatchError> {
        let backend = queue.issue(KernelId::CalculateChunkKeys, self.lookup.len())?;
        let layout = self.layout;
        let active = particles.len();
        let pos = &particles.pos;
        backend.map_lanes(&mut self.lookup, |i, entry| {
            let key = if i < active { layout.key_of(pos[i]) } else { SENTINEL_KEY };
            *entry = LookupEntry { key, index: i as u32 };
        });
        let lookup = &self.lookup;
        backend.map_lanes(&mut particles.last_cell_key[..active], |i, key| *key = lookup[i].key);
        Ok(())
    }

    /// Bitonic network: one `SortIteration` dispatch per (block, segment) pair.
    pub fn sort(&mut self, queue: &mut CommandQueue) -> Result<(), DispatchError> {
        let n = self.lookup.len();
        let mut block = 2;
        while block <= n {
            let mut len = block;
            while len >= 2 {
                let backend = queue.issue(KernelId::SortIteration, n / 2)?;
                let flip = len == block;
                backend.for_each_chunk(&mut self.lookup, len, |_, segment| {
                    compare_exchange(segment, flip)
                });
                len /= 2;
            }
            block *= 2;
        }
        Ok(())
    }

    /// `ResetStartIndices`: one lane per cell.
    pub fn reset_start_indices(&mut self, queue: &mut CommandQueue) -> Result<(), DispatchError> {
        let backend = queue.issue(KernelId::ResetStartIndices, self.start_indices.len())?;
        let starts = &self.start_indices;
        backend.for_each_lane(starts.len(), |k| starts[k].store(EMPTY_START, Ordering::Relaxed));
        Ok(())
    }

    /// `PopulateStartIndices`: slot `i` records itself when it opens a run of its key.
    pub fn populate_start_indices(&mut self, queue: &mut CommandQueue) -> Result<(), DispatchError> {
        let backend = queue.issue(KernelId::PopulateStartIndices, self.lookup.len())?;
        let lookup = &self.lookup;
        let starts = &self.start_indices;
        backend.for_each_lane(lookup.len(), |i| {
            let key = lookup[i].key;
            if key == SENTINEL_KEY {
                return;
            }
            if i == 0 || lookup[i - 1].key != key {
                starts[key as usize].store(i as u32, Ordering::Relaxed);
            }
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Sorted lookup, padding included.
    pub fn lookup(&self) -> &[LookupEntry] {
        &self.lookup
    }

    /// Raw bytes of the lookup for upload to a compute backend.
    pub fn lookup_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.lookup)
    }

    /// First lookup slot of `key`, `None` for an empty or out-of-range cell.
    pub fn start_index(&self, key: u32) -> Option<usize> {
        let start = self.start_indices.get(key as usize)?.load(Ordering::Relaxed);
        (start != EMPTY_START).then_some(start as usize)
    }

    /// Copy of the start table.
    pub fn start_indices(&self) -> Vec<u32> {
        self.start_indices.iter().map(|s| s.load(Ordering::Relaxed)).collect()
    }

    /// Lookup slots holding the particles of `key`.
    pub fn cell_range(&self, key: u32) -> Range<usize> {
        let Some(start) = self.start_index(key) else {
            return 0..0;
        };
        let len = self.lookup[start..].iter().take_while(|e| e.key == key).count();
        start..start + len
    }

    /// Particles of `key`.
    pub fn cell_particles(&self, key: u32) -> impl Iterator<Item = usize> + '_ {
        self.lookup[self.cell_range(key)].iter().map(|e| e.index as usize)
    }

    /// Number of cells holding at least one particle.
    pub fn occupied_cells(&self) -> usize {
        self.start_indices
            .iter()
            .filter(|s| s.load(Ordering::Relaxed) != EMPTY_START)
            .count()
    }

    /// Invoke `f(j)` for every indexed particle `j` within `radius` of `pos`,
    /// searching the 3x3 cells around `pos`. `positions` must be the array the
    /// index was built from (or a small perturbation of it).
    pub fn for_each_neighbor<F>(&self, pos: Vec2, radius: f32, positions: &[Vec2], mut f: F)
    where
        F: FnMut(usize),
    {
        let radius_sq = radius * radius;
        let key = self.layout.key_of(pos);
        for cell in self.layout.neighbourhood(key) {
            for j in self.cell_particles(cell) {
                if positions[j].distance_squared(pos) <= radius_sq {
                    f(j);
                }
            }
        }
    }
}

/// One lane group of a sort pass. `flip` pairs `k` with `len-1-k`, otherwise
/// `k` pairs with `k+len/2`. The smaller key always ends at the lower index.
#[inline]
fn compare_exchange(segment: &mut [LookupEntry], flip: bool) {
    let half = segment.len() / 2;
    let (lo, hi) = segment.split_at_mut(half);
    if flip {
        for (a, b) in lo.iter_mut().zip(hi.iter_mut().rev()) {
            if a.key > b.key {
                std::mem::swap(a, b);
            }
        }
    } else {
        for (a, b) in lo.iter_mut().zip(hi.iter_mut()) {
            if a.key > b.key {
                std::mem::swap(a, b);
            }
        }
    }
}
