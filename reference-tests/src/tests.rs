//! Reference scenarios run under `cargo test` with shortened frame counts.

use crate::{all_tests, body_drop, dam_break, multi_rate, validate_fluid_height, FluidHeightCheck, ReferenceTest};
use glam::Vec2;
use orchestrator::BackendChoice;
use std::path::PathBuf;

/// Config directory at the workspace root (one level up from this crate)
fn config_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    std::path::Path::new(manifest_dir)
        .parent()
        .expect("Could not find workspace root")
        .join("configs")
}

fn shortened(mut test: ReferenceTest, frames: usize) -> ReferenceTest {
    test.frames = frames;
    test
}

fn assert_passes(test: ReferenceTest) {
    let result = test.run().unwrap_or_else(|e| panic!("{} failed to run: {}", test.name, e));
    result.print_summary();
    for check in &result.checks {
        assert!(check.passed, "{}: {} - {:?}", result.name, check.name, check.message);
    }
    assert!(result.passed);
}

#[test]
fn test_dam_break() {
    assert_passes(shortened(dam_break(&config_dir()), 30));
}

#[test]
fn test_body_drop() {
    assert_passes(shortened(body_drop(&config_dir()), 60));
}

#[test]
fn test_multi_rate_springs() {
    assert_passes(shortened(multi_rate(&config_dir()), 30));
}

#[test]
fn test_serial_and_parallel_agree_on_counters() {
    let mut serial = shortened(dam_break(&config_dir()), 5);
    serial.backend = Some(BackendChoice::Serial);
    let mut parallel = shortened(dam_break(&config_dir()), 5);
    parallel.backend = Some(BackendChoice::Parallel { threads: 3 });

    let a = serial.run().unwrap();
    let b = parallel.run().unwrap();
    assert_eq!(a.counters.step_count, b.counters.step_count);
    assert_eq!(a.counters.sim_time.to_bits(), b.counters.sim_time.to_bits());
    assert_eq!(a.sorts, b.sorts);
}

#[test]
fn test_every_config_loads() {
    for test in all_tests(&config_dir()) {
        orchestrator::SimulationConfig::load(&test.config_path)
            .unwrap_or_else(|e| panic!("{}: {}", test.config_path, e));
    }
}

#[test]
fn test_fluid_height_flags_a_rising_fluid() {
    let check = FluidHeightCheck { max_rise: 1.0 };
    let settled = [Vec2::new(1.0, 2.0), Vec2::new(2.0, 3.0)];
    assert!(validate_fluid_height(3.0, &settled, &check).passed);

    let splashed = [Vec2::new(1.0, 2.0), Vec2::new(2.0, 29.0)];
    let result = validate_fluid_height(3.0, &splashed, &check);
    assert!(!result.passed);
    assert!(result.message.unwrap().contains("highest particle 29.000"));
}
