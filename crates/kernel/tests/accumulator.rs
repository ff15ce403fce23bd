//! Cross-domain accumulation: exact, order independent, reset discipline.

use glam::Vec2;
use kernel::{
    fixed_point::{from_fixed, to_fixed},
    AccumulatorError, CrossDomainAccumulator, ExecBackend, PrecisionTable, RbAdjustment,
};
use proptest::prelude::*;

fn contribution(i: usize) -> (Vec2, Vec2, f32) {
    let t = i as f32;
    (
        Vec2::new((t * 0.37).sin() * 0.01, (t * 0.11).cos() * 0.01),
        Vec2::new((t * 1.3).sin(), (t * 0.7).cos()),
        (t * 0.05).sin() * 0.2,
    )
}

#[test]
fn many_lanes_sum_exactly() {
    let acc = CrossDomainAccumulator::new(1, PrecisionTable::default());
    acc.reset(0).unwrap();

    let backend = ExecBackend::parallel(8).unwrap();
    let lanes = 10_000;
    backend.for_each_lane(lanes, |i| {
        let (dp, dv, dr) = contribution(i);
        acc.accumulate(0, dp, dv, dr, Vec2::ZERO, Vec2::ZERO).unwrap();
    });

    // integer sum of the individually encoded contributions
    let p = PrecisionTable::default();
    let mut expected = RbAdjustment::default();
    for i in 0..lanes {
        let (dp, dv, dr) = contribution(i);
        expected.delta_pos[0] += to_fixed(dp.x, p.rigid_body);
        expected.delta_pos[1] += to_fixed(dp.y, p.rigid_body);
        expected.delta_vel[0] += to_fixed(dv.x, p.rigid_body);
        expected.delta_vel[1] += to_fixed(dv.y, p.rigid_body);
        expected.delta_rot_vel += to_fixed(dr, p.rigid_body_rotation);
    }
    assert_eq!(acc.consume(0).unwrap(), expected);
}

#[test]
fn reset_after_consume_yields_zero() {
    let acc = CrossDomainAccumulator::new(2, PrecisionTable::default());
    acc.reset(1).unwrap();
    acc.accumulate(1, Vec2::ONE, Vec2::ONE, 1.0, Vec2::ONE, Vec2::ONE).unwrap();
    assert!(!acc.consume(1).unwrap().is_zero());

    acc.reset(1).unwrap();
    assert!(acc.consume(1).unwrap().is_zero());
}

#[test]
fn consume_without_reset_is_an_error() {
    let acc = CrossDomainAccumulator::new(1, PrecisionTable::default());
    assert_eq!(acc.consume(0), Err(AccumulatorError::NotReset { body: 0 }));

    // accumulating does not open the slot
    acc.accumulate(0, Vec2::ONE, Vec2::ZERO, 0.0, Vec2::ZERO, Vec2::ZERO).unwrap();
    assert_eq!(acc.consume(0), Err(AccumulatorError::NotReset { body: 0 }));
}

#[test]
fn recorded_forces_survive_until_consume() {
    let acc = CrossDomainAccumulator::new(1, PrecisionTable::default());
    acc.reset(0).unwrap();
    acc.accumulate(0, Vec2::ZERO, Vec2::ZERO, 0.0, Vec2::new(2.0, 0.0), Vec2::new(0.0, -1.0)).unwrap();
    acc.accumulate(0, Vec2::ZERO, Vec2::ZERO, 0.0, Vec2::new(1.0, 0.0), Vec2::ZERO).unwrap();
    let snap = acc.snapshot(0).unwrap();
    let p = PrecisionTable::default().rigid_body;
    assert_eq!(from_fixed(snap.recorded_spring_force[0], p), 3.0);
    assert_eq!(from_fixed(snap.recorded_friction_force[1], p), -1.0);
}

proptest! {
    #[test]
    fn arrival_order_does_not_matter(
        (values, shuffled_values) in prop::collection::vec((-5.0f32..5.0, -5.0f32..5.0, -3.0f32..3.0), 1..50)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
    ) {
        let forward = CrossDomainAccumulator::new(1, PrecisionTable::default());
        let shuffled = CrossDomainAccumulator::new(1, PrecisionTable::default());
        forward.reset(0).unwrap();
        shuffled.reset(0).unwrap();

        for &(x, y, r) in &values {
            forward.accumulate(0, Vec2::new(x, y), Vec2::new(y, x), r, Vec2::ZERO, Vec2::ZERO).unwrap();
        }
        for &(x, y, r) in &shuffled_values {
            shuffled.accumulate(0, Vec2::new(x, y), Vec2::new(y, x), r, Vec2::ZERO, Vec2::ZERO).unwrap();
        }
        prop_assert_eq!(forward.consume(0).unwrap(), shuffled.consume(0).unwrap());
    }
}
