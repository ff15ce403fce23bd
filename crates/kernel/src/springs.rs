//! Per-cell spring slot allocation and the double-length spring store.
//!
//! Each step every cell is given a number of spring slots derived from its
//! own population and that of its 3x3 neighbourhood. An exclusive prefix sum
//! over those capacities turns them into non-overlapping write ranges in the
//! spring buffer, without per-element locks.
//!
//! The scan works on three buffers:
//!
//! - **C** (`capacities`) keeps the per-cell counts untouched, so writers can
//!   clamp against them after the scan.
//! - **A** / **B** ping-pong: every pass reads one and writes the other.
//!   Seeding A with the counts shifted by one slot makes the inclusive
//!   Hillis–Steele scan produce the exclusive result directly.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::dispatch::{BufferId, CommandQueue, DispatchError, KernelId};
use crate::spatial::SpatialHashSorter;

/// Particle index marking an unused spring slot.
pub const NO_PARTICLE: u32 = u32::MAX;

/// Spring between two particles.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Spring {
    /// First particle (owner; lives in the cell the slot belongs to).
    pub a: u32,
    /// Second particle.
    pub b: u32,
    /// Rest length.
    pub rest_length: f32,
    /// Stiffness.
    pub stiffness: f32,
}

impl Spring {
    /// Unused slot.
    pub const EMPTY: Spring = Spring { a: NO_PARTICLE, b: NO_PARTICLE, rest_length: 0.0, stiffness: 0.0 };

    /// Whether the slot holds a spring.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.a != NO_PARTICLE && self.b != NO_PARTICLE
    }
}

impl Default for Spring {
    fn default() -> Self {
        Self::EMPTY
    }
}

// ---------------------------------------------------------------------------
// Prefix scan
// ---------------------------------------------------------------------------

/// Ping-pong buffers of the exclusive prefix scan.
#[derive(Debug, Clone, Default)]
pub struct PrefixScan {
    a: Vec<u32>,
    b: Vec<u32>,
}

impl PrefixScan {
    /// Buffers for `n` elements.
    pub fn new(n: usize) -> Self {
        Self { a: vec![0; n], b: vec![0; n] }
    }

    /// Exclusive prefix sum of `input` into buffer A, which is returned.
    ///
    /// Dispatches `CopySpringCapacities`, then one `ParallelPrefixSumScan` per
    /// offset 1, 2, 4, ... below `n`, then `CopySpringStartIndices` if the
    /// last pass wrote B.
    pub fn exclusive(&mut self, queue: &mut CommandQueue, input: &[u32]) -> Result<&[u32], DispatchError> {
        let n = input.len();
        self.a.resize(n, 0);
        self.b.resize(n, 0);

        let backend = queue.issue(KernelId::CopySpringCapacities, n)?;
        backend.map_lanes(&mut self.a, |i, x| *x = if i == 0 { 0 } else { input[i - 1] });

        let mut in_a = true;
        let mut offset = 1;
        while offset < n {
            let backend = queue.issue(KernelId::ParallelPrefixSumScan, n)?;
            let (src, dst) = if in_a { (&self.a, &mut self.b) } else { (&self.b, &mut self.a) };
            backend.map_lanes(dst, |i, x| {
                *x = if i >= offset { src[i] + src[i - offset] } else { src[i] };
            });
            in_a = !in_a;
            offset *= 2;
        }

        if !in_a {
            let backend = queue.issue(KernelId::CopySpringStartIndices, n)?;
            let b = &self.b;
            backend.map_lanes(&mut self.a, |i, x| *x = b[i]);
        }
        Ok(&self.a)
    }

    /// Result of the last scan.
    pub fn result(&self) -> &[u32] {
        &self.a
    }
}

// ---------------------------------------------------------------------------
// Slot allocator
// ---------------------------------------------------------------------------

/// Per-cell spring capacities and their start offsets.
#[derive(Debug, Clone)]
pub struct SpringSlotAllocator {
    max_springs: u32,
    chunk_sizes: Vec<u32>,
    capacities: Vec<u32>,
    scan: PrefixScan,
}

impl SpringSlotAllocator {
    /// Allocator for `cells` cells with at most `max_springs` springs per particle.
    pub fn new(cells: usize, max_springs: u32) -> Self {
        Self {
            max_springs,
            chunk_sizes: vec![0; cells],
            capacities: vec![0; cells],
            scan: PrefixScan::new(cells),
        }
    }

    /// Maximum springs per particle.
    pub fn max_springs(&self) -> u32 {
        self.max_springs
    }

    /// Recompute sizes, capacities and offsets from the current index.
    pub fn run(&mut self, queue: &mut CommandQueue, sorter: &SpatialHashSorter) -> Result<(), DispatchError> {
        queue.mark_stale(BufferId::SpringCapacities);
        queue.mark_stale(BufferId::SpringStartIndices);
        self.populate_chunk_sizes(queue, sorter)?;
        self.populate_capacities(queue, sorter)?;
        queue.mark_valid(BufferId::SpringCapacities);
        self.scan.exclusive(queue, &self.capacities)?;
        queue.mark_valid(BufferId::SpringStartIndices);
        tracing::trace!(total = self.total_capacity(), "spring slots allocated");
        Ok(())
    }

    /// `PopulateChunkSizes`: particles per cell.
    fn populate_chunk_sizes(&mut self, queue: &mut CommandQueue, sorter: &SpatialHashSorter) -> Result<(), DispatchError> {
        let backend = queue.issue(KernelId::PopulateChunkSizes, self.chunk_sizes.len())?;
        backend.map_lanes(&mut self.chunk_sizes, |key, size| {
            *size = sorter.cell_range(key as u32).len() as u32;
        });
        Ok(())
    }

    /// `PopulateSpringCapacities`: `size * min(max_springs, neighbourhood - 1)`.
    fn populate_capacities(&mut self, queue: &mut CommandQueue, sorter: &SpatialHashSorter) -> Result<(), DispatchError> {
        let backend = queue.issue(KernelId::PopulateSpringCapacities, self.capacities.len())?;
        let sizes = &self.chunk_sizes;
        let layout = sorter.layout();
        let max_springs = self.max_springs;
        backend.map_lanes(&mut self.capacities, |key, cap| {
            let size = sizes[key];
            if size == 0 {
                *cap = 0;
                return;
            }
            let population: u32 = layout.neighbourhood(key as u32).map(|k| sizes[k as usize]).sum();
            *cap = size * max_springs.min(population.saturating_sub(1));
        });
        Ok(())
    }

    /// Particles per cell.
    pub fn chunk_sizes(&self) -> &[u32] {
        &self.chunk_sizes
    }

    /// Spring slots per cell (buffer C).
    pub fn capacities(&self) -> &[u32] {
        &self.capacities
    }

    /// Exclusive prefix sum of the capacities.
    pub fn start_indices(&self) -> &[u32] {
        self.scan.result()
    }

    /// Sum of all capacities.
    pub fn total_capacity(&self) -> usize {
        self.capacities.iter().map(|&c| c as usize).sum()
    }

    /// Slots of `key` within one half of the spring buffer.
    pub fn cell_slots(&self, key: u32) -> Range<usize> {
        let k = key as usize;
        let start = self.start_indices()[k] as usize;
        start..start + self.capacities[k] as usize
    }
}

// ---------------------------------------------------------------------------
// Spring store
// ---------------------------------------------------------------------------

/// Combined spring buffer: one half holds last step's springs, the other
/// receives this step's. Each half remembers the slot layout it was written with.
#[derive(Debug, Clone)]
pub struct SpringStore {
    buffer: Vec<Spring>,
    half: usize,
    new_is_upper: bool,
    new_layout: SlotLayout,
    last_layout: SlotLayout,
}

#[derive(Debug, Clone, Default)]
struct SlotLayout {
    starts: Vec<u32>,
    capacities: Vec<u32>,
}

impl SlotLayout {
    fn slots(&self, key: usize) -> Range<usize> {
        match (self.starts.get(key), self.capacities.get(key)) {
            (Some(&s), Some(&c)) => s as usize..(s + c) as usize,
            _ => 0..0,
        }
    }
}

impl SpringStore {
    /// Store for `capacity` particles with `max_springs` each; the buffer is
    /// `2 * capacity * max_springs` long.
    pub fn new(capacity: usize, max_springs: u32) -> Self {
        let half = capacity * max_springs as usize;
        Self {
            buffer: vec![Spring::EMPTY; 2 * half],
            half,
            new_is_upper: true,
            new_layout: SlotLayout::default(),
            last_layout: SlotLayout::default(),
        }
    }

    /// Length of one half.
    pub fn half_len(&self) -> usize {
        self.half
    }

    /// Flip half roles: the half written last becomes "last step", and the
    /// other half is laid out per `alloc` for this step's writes.
    pub fn swap_halves(&mut self, alloc: &SpringSlotAllocator) {
        self.new_is_upper = !self.new_is_upper;
        self.last_layout = std::mem::take(&mut self.new_layout);
        self.new_layout = SlotLayout {
            starts: alloc.start_indices().to_vec(),
            capacities: alloc.capacities().to_vec(),
        };
    }

    fn halves(&self) -> (&[Spring], &[Spring]) {
        let (lower, upper) = self.buffer.split_at(self.half);
        if self.new_is_upper { (lower, upper) } else { (upper, lower) }
    }

    fn halves_mut(&mut self) -> (&mut [Spring], &mut [Spring]) {
        let (lower, upper) = self.buffer.split_at_mut(self.half);
        if self.new_is_upper { (lower, upper) } else { (upper, lower) }
    }

    /// Last step's half.
    pub fn last_half(&self) -> &[Spring] {
        self.halves().0
    }

    /// This step's half.
    pub fn new_half(&self) -> &[Spring] {
        self.halves().1
    }

    /// This step's half, mutable.
    pub fn new_half_mut(&mut self) -> &mut [Spring] {
        self.halves_mut().1
    }

    /// Springs written for `key` last step.
    pub fn last_cell(&self, key: u32) -> &[Spring] {
        let range = self.last_layout.slots(key as usize);
        self.last_half().get(range).unwrap_or(&[])
    }

    /// Springs written for `key` this step.
    pub fn new_cell(&self, key: u32) -> &[Spring] {
        let range = self.new_layout.slots(key as usize);
        self.new_half().get(range).unwrap_or(&[])
    }

    /// Split this step's half into one disjoint slice per cell, next to the
    /// slices each cell wrote last step, so per-cell lanes can write in parallel.
    pub fn split_cells(&mut self) -> (Vec<&mut [Spring]>, Vec<&[Spring]>) {
        let new_layout = &self.new_layout;
        let last_layout = &self.last_layout;
        let (lower, upper) = self.buffer.split_at_mut(self.half);
        let (last, mut rest) = if self.new_is_upper { (&*lower, upper) } else { (&*upper, lower) };

        let mut cells = Vec::with_capacity(new_layout.capacities.len());
        let mut cursor = 0usize;
        for (&start, &cap) in new_layout.starts.iter().zip(&new_layout.capacities) {
            let skip = (start as usize).saturating_sub(cursor).min(rest.len());
            rest = &mut std::mem::take(&mut rest)[skip..];
            let take = (cap as usize).min(rest.len());
            let (cell, tail) = std::mem::take(&mut rest).split_at_mut(take);
            cells.push(cell);
            rest = tail;
            cursor += skip + take;
        }

        let previous = (0..cells.len())
            .map(|k| last.get(last_layout.slots(k)).unwrap_or(&[]))
            .collect();
        (cells, previous)
    }

    /// Slots of `key` in last step's half, for matching existing springs.
    pub fn last_slots(&self, key: u32) -> Range<usize> {
        self.last_layout.slots(key as usize)
    }

    /// Host-side write of `springs` into the slots of `key`. Springs beyond the
    /// cell capacity are dropped and counted; unused slots are cleared.
    pub fn write_cell(&mut self, key: u32, springs: &[Spring]) -> usize {
        let range = self.new_layout.slots(key as usize);
        let half = self.half;
        let range = range.start.min(half)..range.end.min(half);
        let slots = &mut self.new_half_mut()[range];
        fill_cell(slots, springs.iter().copied())
    }

    /// Linked springs in this step's half.
    pub fn linked_count(&self) -> usize {
        self.new_half().iter().filter(|s| s.is_linked()).count()
    }
}

/// Write `springs` into `slots`, clearing the remainder. Returns how many
/// springs did not fit.
pub fn fill_cell(slots: &mut [Spring], springs: impl IntoIterator<Item = Spring>) -> usize {
    let mut written = 0;
    let mut dropped = 0;
    for s in springs {
        if written < slots.len() {
            slots[written] = s;
            written += 1;
        } else {
            dropped += 1;
        }
    }
    slots[written..].fill(Spring::EMPTY);
    dropped
}
