//! Dispatch model: named data-parallel kernels issued in strict order.
//!
//! Every pipeline stage is a *dispatch* over N independent lanes (one per
//! particle slot, grid cell, rigid body, ...). Lanes of one dispatch run in
//! any order; a dispatch returns only after all of its lanes finished, which
//! is the full barrier the next dispatch relies on.
//!
//! Lanes never share a mutable element. They either write their own slot of
//! an output slice ([`ExecBackend::map_lanes`], [`ExecBackend::for_each_chunk`])
//! or go through atomics. Passes that read and write the same logical data
//! (sort, scan) borrow two distinct buffers and flip their roles between
//! dispatches.
//!
//! [`CommandQueue`] is the host-side view of the stream: it checks that the
//! buffers a kernel consumes are valid for the current step, records the
//! dispatch, then runs it.

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use crate::accumulator::AccumulatorError;

/// Where lanes execute.
#[derive(Debug, Clone, Default)]
pub enum ExecBackend {
    /// Single-threaded reference execution, lane order 0..N.
    #[default]
    Serial,
    /// Lanes spread over a rayon thread pool.
    Parallel(Arc<rayon::ThreadPool>),
}

impl ExecBackend {
    /// Build a parallel backend with `threads` workers (0 = rayon default).
    pub fn parallel(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("whirl-lane-{i}"))
            .build()?;
        Ok(Self::Parallel(Arc::new(pool)))
    }

    /// Number of worker threads lanes are spread over.
    pub fn threads(&self) -> usize {
        match self {
            Self::Serial => 1,
            Self::Parallel(pool) => pool.current_num_threads(),
        }
    }

    /// One lane per element of `out`; lane `i` may only write `out[i]`.
    pub fn map_lanes<T, F>(&self, out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        match self {
            Self::Serial => out.iter_mut().enumerate().for_each(|(i, x)| f(i, x)),
            Self::Parallel(pool) => {
                let f = &f;
                pool.install(|| out.par_iter_mut().enumerate().for_each(|(i, x)| f(i, x)))
            }
        }
    }

    /// `lanes` lanes with no owned output; writes go through atomics.
    pub fn for_each_lane<F>(&self, lanes: usize, f: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        match self {
            Self::Serial => (0..lanes).for_each(f),
            Self::Parallel(pool) => {
                let f = &f;
                pool.install(|| (0..lanes).into_par_iter().for_each(f))
            }
        }
    }

    /// Lanes grouped by disjoint chunks of `chunk_len` elements. The closure
    /// receives the chunk index and exclusive access to that chunk.
    pub fn for_each_chunk<T, F>(&self, data: &mut [T], chunk_len: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        debug_assert!(chunk_len > 0);
        match self {
            Self::Serial => data
                .chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(c, chunk)| f(c, chunk)),
            Self::Parallel(pool) => {
                let f = &f;
                pool.install(|| {
                    data.par_chunks_mut(chunk_len)
                        .enumerate()
                        .for_each(|(c, chunk)| f(c, chunk))
                })
            }
        }
    }
}

/// Buffers whose validity the scheduler tracks between dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BufferId {
    /// Particle state arrays.
    Particles = 0,
    /// Sorted `(cell_key, particle)` lookup.
    SpatialLookup,
    /// First lookup slot per cell.
    StartIndices,
    /// Spring slots per cell.
    SpringCapacities,
    /// Exclusive prefix sum of spring capacities.
    SpringStartIndices,
    /// Combined last-step / new-step spring buffer.
    Springs,
    /// Rigid-body state.
    RigidBodies,
    /// World-space rigid-body vertices.
    RbVertices,
    /// Per-body cross-domain adjustments (open between reset and consume).
    Adjustments,
    /// Per-cell fluid measurements.
    FluidRecords,
}

impl BufferId {
    /// Every tracked buffer.
    pub const ALL: [BufferId; 10] = [
        BufferId::Particles,
        BufferId::SpatialLookup,
        BufferId::StartIndices,
        BufferId::SpringCapacities,
        BufferId::SpringStartIndices,
        BufferId::Springs,
        BufferId::RigidBodies,
        BufferId::RbVertices,
        BufferId::Adjustments,
        BufferId::FluidRecords,
    ];

    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// Bit set of buffers that hold data consistent with the current step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferValidity(u32);

impl BufferValidity {
    /// Nothing valid.
    pub fn none() -> Self {
        Self(0)
    }

    /// Mark `buffer` as holding current data.
    pub fn mark_valid(&mut self, buffer: BufferId) {
        self.0 |= buffer.bit();
    }

    /// Mark `buffer` as stale; dispatches requiring it will be refused.
    pub fn mark_stale(&mut self, buffer: BufferId) {
        self.0 &= !buffer.bit();
    }

    /// Whether `buffer` is valid.
    pub fn is_valid(&self, buffer: BufferId) -> bool {
        self.0 & buffer.bit() != 0
    }

    /// First buffer in `required` that is not valid.
    pub fn first_missing(&self, required: &[BufferId]) -> Option<BufferId> {
        required.iter().copied().find(|b| !self.is_valid(*b))
    }
}

/// Named kernels, in the order they appear within a frame.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    // Spatial sort
    CalculateChunkKeys,
    SortIteration,
    ResetStartIndices,
    PopulateStartIndices,
    // Spring slot allocation
    PopulateChunkSizes,
    PopulateSpringCapacities,
    CopySpringCapacities,
    ParallelPrefixSumScan,
    CopySpringStartIndices,
    // Particle simulation
    PreCalculations,
    CalculateDensities,
    PrepSpringData,
    TransferAllSpringData,
    ParticleForces,
    ResetFluidData,
    RecordFluidData,
    // Rigid-body simulation
    ResetAdjustments,
    SimulateRbRb,
    SimulateRbSprings,
    AdjustRbDatas,
    SimulateRbParticle,
    ResetRbVertices,
    ConsumeAdjustments,
    UpdateRigidBodies,
    UpdateRbVertices,
    // Integration / output
    UpdatePositions,
    Render,
}

impl KernelId {
    /// Buffers that must be valid before this kernel may run.
    pub fn requires(self) -> &'static [BufferId] {
        use BufferId::*;
        match self {
            KernelId::CalculateChunkKeys | KernelId::SortIteration => &[Particles],
            KernelId::ResetStartIndices => &[],
            KernelId::PopulateStartIndices => &[SpatialLookup],
            KernelId::PopulateChunkSizes => &[SpatialLookup, StartIndices],
            KernelId::PopulateSpringCapacities => &[StartIndices],
            KernelId::CopySpringCapacities
            | KernelId::ParallelPrefixSumScan
            | KernelId::CopySpringStartIndices => &[],
            KernelId::PreCalculations => &[Particles],
            KernelId::CalculateDensities | KernelId::ParticleForces => {
                &[Particles, SpatialLookup, StartIndices]
            }
            KernelId::PrepSpringData | KernelId::TransferAllSpringData => {
                &[Particles, SpatialLookup, SpringCapacities, SpringStartIndices, Springs]
            }
            KernelId::ResetFluidData => &[],
            KernelId::RecordFluidData => &[Particles, FluidRecords],
            KernelId::ResetAdjustments => &[RigidBodies],
            KernelId::SimulateRbRb => &[RigidBodies, RbVertices, Adjustments],
            KernelId::SimulateRbSprings | KernelId::AdjustRbDatas => &[RigidBodies, Adjustments],
            KernelId::SimulateRbParticle => &[Particles, RigidBodies, RbVertices, Adjustments],
            KernelId::ResetRbVertices => &[RbVertices],
            KernelId::ConsumeAdjustments => &[RigidBodies, Adjustments],
            KernelId::UpdateRigidBodies => &[RigidBodies],
            KernelId::UpdateRbVertices => &[RigidBodies, RbVertices],
            KernelId::UpdatePositions => &[Particles],
            KernelId::Render => &[],
        }
    }

    /// Kernels whose body lives behind [`crate::kernels::SimulationKernels`]
    /// rather than in this crate.
    pub fn is_opaque(self) -> bool {
        matches!(
            self,
            KernelId::PreCalculations
                | KernelId::CalculateDensities
                | KernelId::PrepSpringData
                | KernelId::TransferAllSpringData
                | KernelId::ParticleForces
                | KernelId::SimulateRbRb
                | KernelId::SimulateRbSprings
                | KernelId::AdjustRbDatas
                | KernelId::SimulateRbParticle
                | KernelId::ResetRbVertices
                | KernelId::UpdateRigidBodies
                | KernelId::UpdateRbVertices
                | KernelId::UpdatePositions
                | KernelId::Render
        )
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One issued dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Kernel that ran.
    pub kernel: KernelId,
    /// Lane count it ran over.
    pub lanes: usize,
}

/// Dispatch refused by the queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// A required buffer holds data from a skipped or earlier step.
    #[error("kernel {kernel} requires {buffer:?}, which is stale")]
    StaleBuffer {
        /// Refused kernel.
        kernel: KernelId,
        /// First stale requirement.
        buffer: BufferId,
    },
    /// The kernel implementation was asked to run a kernel it does not provide.
    #[error("kernel {kernel} is not provided by this implementation")]
    Unsupported {
        /// Requested kernel.
        kernel: KernelId,
    },
    /// The accumulator refused a correction written by the kernel.
    #[error("kernel {kernel} lost rigid-body corrections: {source}")]
    Adjustment {
        /// Kernel that wrote the correction.
        kernel: KernelId,
        /// First refusal seen during the dispatch.
        source: AccumulatorError,
    },
}

/// Ordered dispatch stream plus buffer-validity bookkeeping.
#[derive(Debug, Default)]
pub struct CommandQueue {
    backend: ExecBackend,
    validity: BufferValidity,
    log: Vec<DispatchRecord>,
    recording: bool,
}

impl CommandQueue {
    /// Queue executing on `backend`. Recording of the dispatch log is on.
    pub fn new(backend: ExecBackend) -> Self {
        Self {
            backend,
            validity: BufferValidity::none(),
            log: Vec::new(),
            recording: true,
        }
    }

    /// Backend lanes run on.
    pub fn backend(&self) -> &ExecBackend {
        &self.backend
    }

    /// Current validity flags.
    pub fn validity(&self) -> BufferValidity {
        self.validity
    }

    /// Mark a buffer valid.
    pub fn mark_valid(&mut self, buffer: BufferId) {
        self.validity.mark_valid(buffer);
    }

    /// Mark a buffer stale.
    pub fn mark_stale(&mut self, buffer: BufferId) {
        self.validity.mark_stale(buffer);
    }

    /// Whether `buffer` is valid.
    pub fn is_valid(&self, buffer: BufferId) -> bool {
        self.validity.is_valid(buffer)
    }

    /// Enable or disable the dispatch log.
    pub fn set_recording(&mut self, on: bool) {
        self.recording = on;
    }

    /// Dispatches recorded since the last [`CommandQueue::clear_log`].
    pub fn log(&self) -> &[DispatchRecord] {
        &self.log
    }

    /// Drop recorded dispatches.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Check that `kernel` may run now and record it. The caller runs the
    /// lanes right after, so the returned backend is handed back for that.
    pub fn issue(&mut self, kernel: KernelId, lanes: usize) -> Result<&ExecBackend, DispatchError> {
        if let Some(buffer) = self.validity.first_missing(kernel.requires()) {
            return Err(DispatchError::StaleBuffer { kernel, buffer });
        }
        tracing::trace!(%kernel, lanes, "dispatch");
        if self.recording {
            self.log.push(DispatchRecord { kernel, lanes });
        }
        Ok(&self.backend)
    }

    /// Number of times `kernel` appears in the log.
    pub fn count(&self, kernel: KernelId) -> usize {
        self.log.iter().filter(|r| r.kernel == kernel).count()
    }
}

/// Smallest power of two >= `n` (1 for 0).
pub fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}
