//! Cross-domain accumulator: per-rigid-body staging of corrections coming
//! from many concurrent particle lanes.
//!
//! Lifecycle of a slot within one coupling step:
//!
//! 1. `reset` zeroes it and opens it.
//! 2. Any number of lanes call `accumulate` concurrently. Values are encoded
//!    to fixed point and added with atomic integer adds, so the totals do not
//!    depend on arrival order.
//! 3. `consume` reads and clears the totals exactly once and closes the slot.
//!
//! No lock guards the slot between reset and consume; readers are kept out
//! by the dispatch order alone.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Vec2};

use crate::dispatch::{BufferId, CommandQueue, DispatchError, KernelId};
use crate::fixed_point::{to_fixed, to_fixed2, PrecisionTable};
use crate::rigid_body::RigidBody;

/// Totals consumed from one slot, fixed point.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RbAdjustment {
    /// Position correction.
    pub delta_pos: [i32; 2],
    /// Velocity correction.
    pub delta_vel: [i32; 2],
    /// Rotational velocity correction.
    pub delta_rot_vel: i32,
    /// Spring force sample (sensors / display only).
    pub recorded_spring_force: [i32; 2],
    /// Friction force sample (sensors / display only).
    pub recorded_friction_force: [i32; 2],
}

impl RbAdjustment {
    /// Position correction as a vector.
    pub fn delta_pos(&self) -> IVec2 {
        IVec2::from_array(self.delta_pos)
    }

    /// Velocity correction as a vector.
    pub fn delta_vel(&self) -> IVec2 {
        IVec2::from_array(self.delta_vel)
    }

    /// Spring force sample as a vector.
    pub fn recorded_spring_force(&self) -> IVec2 {
        IVec2::from_array(self.recorded_spring_force)
    }

    /// Friction force sample as a vector.
    pub fn recorded_friction_force(&self) -> IVec2 {
        IVec2::from_array(self.recorded_friction_force)
    }

    /// Whether every total is zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Misuse of the reset / consume discipline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccumulatorError {
    /// Slot consumed without a `reset` in the current step (or consumed twice).
    #[error("adjustment slot {body} consumed without being reset this step")]
    NotReset {
        /// Rigid-body index.
        body: usize,
    },
    /// Index outside the accumulator.
    #[error("no adjustment slot for body {body} (have {count})")]
    UnknownBody {
        /// Requested index.
        body: usize,
        /// Number of slots.
        count: usize,
    },
}

/// Failure of the `ConsumeAdjustments` dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumeError {
    /// Queue refused the dispatch.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// A slot was not open.
    #[error(transparent)]
    Accumulator(#[from] AccumulatorError),
}

#[derive(Debug, Default)]
struct Slot {
    pos: [AtomicI32; 2],
    vel: [AtomicI32; 2],
    rot_vel: AtomicI32,
    spring: [AtomicI32; 2],
    friction: [AtomicI32; 2],
    open: AtomicBool,
}

impl Slot {
    fn counters(&self) -> [&AtomicI32; 9] {
        [
            &self.pos[0],
            &self.pos[1],
            &self.vel[0],
            &self.vel[1],
            &self.rot_vel,
            &self.spring[0],
            &self.spring[1],
            &self.friction[0],
            &self.friction[1],
        ]
    }

    fn add(&self, adj: &RbAdjustment) {
        let values = [
            adj.delta_pos[0],
            adj.delta_pos[1],
            adj.delta_vel[0],
            adj.delta_vel[1],
            adj.delta_rot_vel,
            adj.recorded_spring_force[0],
            adj.recorded_spring_force[1],
            adj.recorded_friction_force[0],
            adj.recorded_friction_force[1],
        ];
        for (counter, v) in self.counters().into_iter().zip(values) {
            if v != 0 {
                counter.fetch_add(v, Ordering::Relaxed);
            }
        }
    }

    fn read(&self, take: bool) -> RbAdjustment {
        let get = |a: &AtomicI32| if take { a.swap(0, Ordering::Relaxed) } else { a.load(Ordering::Relaxed) };
        RbAdjustment {
            delta_pos: [get(&self.pos[0]), get(&self.pos[1])],
            delta_vel: [get(&self.vel[0]), get(&self.vel[1])],
            delta_rot_vel: get(&self.rot_vel),
            recorded_spring_force: [get(&self.spring[0]), get(&self.spring[1])],
            recorded_friction_force: [get(&self.friction[0]), get(&self.friction[1])],
        }
    }
}

/// One adjustment slot per rigid body.
#[derive(Debug)]
pub struct CrossDomainAccumulator {
    slots: Vec<Slot>,
    precision: PrecisionTable,
}

impl CrossDomainAccumulator {
    /// Slots for `bodies` rigid bodies, all closed.
    pub fn new(bodies: usize, precision: PrecisionTable) -> Self {
        Self {
            slots: (0..bodies).map(|_| Slot::default()).collect(),
            precision,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Return `true` if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Precision table used for encoding.
    pub fn precision(&self) -> &PrecisionTable {
        &self.precision
    }

    fn slot(&self, body: usize) -> Result<&Slot, AccumulatorError> {
        self.slots
            .get(body)
            .ok_or(AccumulatorError::UnknownBody { body, count: self.slots.len() })
    }

    /// Zero the slot of `body` and open it for this step.
    pub fn reset(&self, body: usize) -> Result<(), AccumulatorError> {
        let slot = self.slot(body)?;
        slot.counters().into_iter().for_each(|c| c.store(0, Ordering::Relaxed));
        slot.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Add float corrections to `body`. Safe to call from many lanes at once.
    pub fn accumulate(
        &self,
        body: usize,
        delta_pos: Vec2,
        delta_vel: Vec2,
        delta_rot_vel: f32,
        spring_force: Vec2,
        friction_force: Vec2,
    ) -> Result<(), AccumulatorError> {
        let p = self.precision.rigid_body;
        let adj = RbAdjustment {
            delta_pos: to_fixed2(delta_pos, p).to_array(),
            delta_vel: to_fixed2(delta_vel, p).to_array(),
            delta_rot_vel: to_fixed(delta_rot_vel, self.precision.rigid_body_rotation),
            recorded_spring_force: to_fixed2(spring_force, p).to_array(),
            recorded_friction_force: to_fixed2(friction_force, p).to_array(),
        };
        self.accumulate_fixed(body, &adj)
    }

    /// Add pre-encoded corrections to `body`.
    pub fn accumulate_fixed(&self, body: usize, adj: &RbAdjustment) -> Result<(), AccumulatorError> {
        self.slot(body)?.add(adj);
        Ok(())
    }

    /// Current totals of `body` without clearing them.
    pub fn snapshot(&self, body: usize) -> Result<RbAdjustment, AccumulatorError> {
        Ok(self.slot(body)?.read(false))
    }

    /// Read and clear the totals of `body`, closing the slot.
    pub fn consume(&self, body: usize) -> Result<RbAdjustment, AccumulatorError> {
        let slot = self.slot(body)?;
        if !slot.open.swap(false, Ordering::AcqRel) {
            return Err(AccumulatorError::NotReset { body });
        }
        Ok(slot.read(true))
    }

    /// [`CrossDomainAccumulator::consume`], then apply the totals to `rb`.
    pub fn consume_and_apply(&self, body: usize, rb: &mut RigidBody) -> Result<RbAdjustment, AccumulatorError> {
        let adj = self.consume(body)?;
        rb.apply_adjustment(&adj, &self.precision);
        Ok(adj)
    }

    // -----------------------------------------------------------------------
    // Dispatches
    // -----------------------------------------------------------------------

    /// `ResetAdjustments`: one lane per body.
    pub fn reset_all(&self, queue: &mut CommandQueue) -> Result<(), DispatchError> {
        let backend = queue.issue(KernelId::ResetAdjustments, self.slots.len())?;
        backend.for_each_lane(self.slots.len(), |b| {
            let slot = &self.slots[b];
            slot.counters().into_iter().for_each(|c| c.store(0, Ordering::Relaxed));
            slot.open.store(true, Ordering::Release);
        });
        queue.mark_valid(BufferId::Adjustments);
        Ok(())
    }

    /// `ConsumeAdjustments`: one lane per body. Reports the lowest body whose
    /// slot was not open; every open slot is still consumed. A body set larger
    /// than the slot table is refused before any lane runs.
    pub fn consume_all(&self, queue: &mut CommandQueue, bodies: &mut [RigidBody]) -> Result<(), ConsumeError> {
        if bodies.len() > self.slots.len() {
            return Err(AccumulatorError::UnknownBody { body: self.slots.len(), count: self.slots.len() }.into());
        }
        let backend = queue.issue(KernelId::ConsumeAdjustments, bodies.len())?;
        let failed = AtomicU32::new(u32::MAX);
        backend.map_lanes(bodies, |b, rb| {
            if self.consume_and_apply(b, rb).is_err() {
                failed.fetch_min(b as u32, Ordering::Relaxed);
            }
        });
        queue.mark_stale(BufferId::Adjustments);
        match failed.into_inner() {
            u32::MAX => Ok(()),
            body => Err(AccumulatorError::NotReset { body: body as usize }.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ExecBackend;
    use crate::rigid_body::{RigidBodyDesc, RigidBodySet};

    fn body_set(n: usize) -> RigidBodySet {
        let desc = RigidBodyDesc {
            pos: Vec2::ZERO,
            vel: Vec2::ZERO,
            rot_vel: 0.0,
            mass: 1.0,
            vertices: vec![Vec2::X, Vec2::Y, -Vec2::X],
            linked_body: None,
            spring_rest_length: 0.0,
            spring_stiffness: 0.0,
        };
        RigidBodySet::from_descs(&vec![desc; n], &PrecisionTable::default())
    }

    #[test]
    fn consume_without_reset_is_flagged() {
        let acc = CrossDomainAccumulator::new(2, PrecisionTable::default());
        assert_eq!(acc.consume(0), Err(AccumulatorError::NotReset { body: 0 }));
        acc.reset(0).unwrap();
        assert!(acc.consume(0).unwrap().is_zero());
        assert_eq!(acc.consume(0), Err(AccumulatorError::NotReset { body: 0 }));
    }

    #[test]
    fn unknown_body() {
        let acc = CrossDomainAccumulator::new(1, PrecisionTable::default());
        assert_eq!(acc.reset(3), Err(AccumulatorError::UnknownBody { body: 3, count: 1 }));
    }

    #[test]
    fn accumulate_encodes_per_domain() {
        let acc = CrossDomainAccumulator::new(1, PrecisionTable::default());
        acc.reset(0).unwrap();
        acc.accumulate(0, Vec2::new(0.001, 0.0), Vec2::ZERO, 0.5, Vec2::ZERO, Vec2::ZERO)
            .unwrap();
        let snap = acc.snapshot(0).unwrap();
        assert_eq!(snap.delta_pos, [50, 0]);
        assert_eq!(snap.delta_rot_vel, 250_000);
        // snapshot leaves the totals in place
        assert_eq!(acc.consume(0).unwrap(), snap);
    }

    #[test]
    fn consume_all_applies_and_flags_closed_slots() {
        let mut set = body_set(3);
        let acc = CrossDomainAccumulator::new(3, PrecisionTable::default());
        let mut queue = CommandQueue::new(ExecBackend::Serial);
        queue.mark_valid(BufferId::RigidBodies);

        acc.reset_all(&mut queue).unwrap();
        acc.accumulate(1, Vec2::new(1.0, 0.0), Vec2::ZERO, 0.0, Vec2::ZERO, Vec2::ZERO)
            .unwrap();
        acc.consume_all(&mut queue, &mut set.bodies).unwrap();
        assert_eq!(set.bodies[1].pos, Vec2::new(1.0, 0.0));
        assert!(!queue.is_valid(BufferId::Adjustments));

        // second consume in the same step: queue refuses first
        let err = acc.consume_all(&mut queue, &mut set.bodies).unwrap_err();
        assert!(matches!(err, ConsumeError::Dispatch(DispatchError::StaleBuffer { .. })));

        // slot-level discipline is still enforced if the queue is bypassed
        queue.mark_valid(BufferId::Adjustments);
        acc.reset(2).unwrap();
        let err = acc.consume_all(&mut queue, &mut set.bodies).unwrap_err();
        assert_eq!(err, ConsumeError::Accumulator(AccumulatorError::NotReset { body: 0 }));
    }

    #[test]
    fn consume_all_refuses_bodies_without_slots() {
        let mut set = body_set(3);
        let acc = CrossDomainAccumulator::new(2, PrecisionTable::default());
        let mut queue = CommandQueue::new(ExecBackend::Serial);
        queue.mark_valid(BufferId::RigidBodies);
        acc.reset_all(&mut queue).unwrap();

        let err = acc.consume_all(&mut queue, &mut set.bodies).unwrap_err();
        assert_eq!(err, ConsumeError::Accumulator(AccumulatorError::UnknownBody { body: 2, count: 2 }));
        // nothing was consumed, the open slots stay open
        assert!(acc.consume(0).unwrap().is_zero());
        assert!(queue.is_valid(BufferId::Adjustments));
    }
}
