//! Parallel simulation kernel for 2D SPH fluid coupled with rigid bodies.
//!
//! This crate holds every buffer of the simulation and the data-parallel
//! stages that keep them consistent from step to step. It knows nothing about
//! frames or wall-clock time; the orchestrator decides what runs when.
//!
//! # Modules
//! - [`dispatch`] -- Lane execution backends, kernel ids, buffer validity, command queue.
//! - [`fixed_point`] -- Float <-> scaled-integer codec and the per-domain precision table.
//! - [`particle`] -- Struct-of-arrays particle storage, seeds and materials.
//! - [`spatial`] -- Grid layout and the bitonic-sorted spatial lookup.
//! - [`springs`] -- Per-cell spring slot allocation (prefix scan) and the spring store.
//! - [`accumulator`] -- Fixed-point per-body staging of cross-domain corrections.
//! - [`rigid_body`] -- Rigid-body state and vertex buffers.
//! - [`fluid_record`] -- Per-cell fluid measurements.
//! - [`kernels`] -- The world container and the opaque-kernel trait.
//! - [`sph`] -- 2D smoothing kernels.
//! - [`reference`] -- CPU implementation of the opaque kernels.

#![warn(missing_docs)]

pub mod accumulator;
pub mod dispatch;
pub mod fixed_point;
pub mod fluid_record;
pub mod kernels;
pub mod particle;
pub mod reference;
pub mod rigid_body;
pub mod sph;
pub mod spatial;
pub mod springs;

pub use accumulator::{AccumulatorError, ConsumeError, CrossDomainAccumulator, RbAdjustment};
pub use dispatch::{BufferId, BufferValidity, CommandQueue, DispatchError, DispatchRecord, ExecBackend, KernelId};
pub use fixed_point::{from_fixed, from_fixed2, to_fixed, to_fixed2, PrecisionDomain, PrecisionTable};
pub use fluid_record::{CellMeasurement, FluidRecords};
pub use kernels::{InteractionState, SimWorld, SimulationKernels, StepParams, WorldConfig};
pub use particle::{ParticleArrays, ParticleMaterial, ParticleSeed};
pub use reference::ReferenceKernels;
pub use rigid_body::{RigidBody, RigidBodyDesc, RigidBodySet};
pub use spatial::{GridError, GridLayout, LookupEntry, SpatialHashSorter, EMPTY_START, SENTINEL_KEY};
pub use springs::{PrefixScan, Spring, SpringSlotAllocator, SpringStore};
