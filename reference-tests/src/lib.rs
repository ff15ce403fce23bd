//! Scenario harness for the scheduling core
//!
//! Each reference scenario loads a scene configuration, drives the scheduler
//! headless for a fixed number of frames and validates the final state
//! against scenario-specific expectations.

#[cfg(test)]
mod tests;

use glam::Vec2;
use orchestrator::config::SimulationConfig;
use orchestrator::{create_scheduler, Counters, FrameInput, TimeStepMode};
use std::path::Path;
use std::time::Instant;

/// Expected result criteria for a scenario
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// All particles and body centres stay inside the simulation box
    pub within_boundary: bool,
    /// Number of active particles at the end of the run
    pub particle_count: Option<usize>,
    /// Simulated time must match the time-step policy
    pub time_accounting: Option<TimeAccountingCheck>,
    /// Rigid body that must have fallen
    pub body_drop: Option<BodyDropCheck>,
    /// Rigid-body groups per frame
    pub rb_updates_per_frame: Option<usize>,
    /// Fluid must not be thrown upwards
    pub fluid_height: Option<FluidHeightCheck>,
}

/// Check simulated time against scaled time
#[derive(Debug, Clone)]
pub struct TimeAccountingCheck {
    /// Relative tolerance (0.0 to 1.0)
    pub tolerance: f64,
}

/// Check that a rigid body moved down
#[derive(Debug, Clone)]
pub struct BodyDropCheck {
    /// Body index
    pub body: usize,
    /// Minimum downward displacement
    pub min_drop: f32,
}

/// Check that the fluid settles instead of splashing apart
#[derive(Debug, Clone)]
pub struct FluidHeightCheck {
    /// Largest allowed rise of the mean particle height over the run
    pub max_rise: f32,
}

/// Result of running a scenario
#[derive(Debug)]
pub struct TestResult {
    /// Scenario name
    pub name: String,
    /// Whether every check passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Final counters
    pub counters: Counters,
    /// Frames executed
    pub frames: usize,
    /// Spatial index rebuilds over the run
    pub sorts: u64,
    /// Wall-clock time of the run (seconds)
    pub wall_time: f64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail message
    pub message: Option<String>,
}

impl CheckResult {
    fn new(name: &str, passed: bool, message: Option<String>) -> Self {
        Self { name: name.to_string(), passed, message }
    }
}

/// A reference scenario
pub struct ReferenceTest {
    /// Scenario name
    pub name: String,
    /// Path to configuration file
    pub config_path: String,
    /// Number of frames to run
    pub frames: usize,
    /// Host frame time fed to every frame (seconds)
    pub frame_time: f32,
    /// Override the configured backend
    pub backend: Option<orchestrator::BackendChoice>,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

impl ReferenceTest {
    /// Run the scenario and return results
    pub fn run(&self) -> Result<TestResult, String> {
        tracing::info!("Running scenario: {}", self.name);

        let mut config = SimulationConfig::load(&self.config_path).map_err(|e| e.to_string())?;
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        let boundary = config.boundary;
        let program_speed = f64::from(config.program_speed);
        let fixed_frame_time = match config.time_step_mode {
            TimeStepMode::Fixed => Some(f64::from(config.time_step * config.time_scale * config.program_speed)),
            TimeStepMode::Dynamic => None,
        };

        let mut scheduler = create_scheduler(config).map_err(|e| e.to_string())?;
        let initial_bodies: Vec<Vec2> = scheduler.world().bodies.bodies.iter().map(|b| b.pos).collect();
        let initial_height = {
            let particles = &scheduler.world().particles;
            mean_height(&particles.pos[..particles.len()])
        };
        tracing::info!(
            "Initialized: {} particles, {} rigid bodies",
            scheduler.world().particles.len(),
            initial_bodies.len()
        );

        let start = Instant::now();
        let mut sorts = 0_u64;
        let mut min_rb_updates = usize::MAX;
        let mut max_rb_updates = 0;
        for frame in 0..self.frames {
            let report = scheduler.step(&FrameInput::idle(self.frame_time)).map_err(|e| e.to_string())?;
            sorts += u64::from(report.sorts);
            min_rb_updates = min_rb_updates.min(report.rb_updates.len());
            max_rb_updates = max_rb_updates.max(report.rb_updates.len());

            if (frame + 1) % (self.frames / 10).max(1) == 0 {
                let progress = ((frame + 1) as f32 / self.frames as f32) * 100.0;
                tracing::info!("Progress: {:.0}% ({}/{})", progress, frame + 1, self.frames);
            }
        }
        let wall_time = start.elapsed().as_secs_f64();
        let counters = scheduler.counters();
        tracing::info!(
            "Scenario complete: {} frames, {} steps, {:.4}s simulated",
            self.frames,
            counters.step_count,
            counters.sim_time
        );

        let world = scheduler.world();
        let positions = &world.particles.pos[..world.particles.len()];
        let bodies: Vec<Vec2> = world.bodies.bodies.iter().map(|b| b.pos).collect();

        let mut checks = Vec::new();
        if self.expected.within_boundary {
            checks.push(validate_within_boundary(positions, &bodies, boundary));
        }
        if let Some(expected) = self.expected.particle_count {
            let count = positions.len();
            checks.push(CheckResult::new(
                "Particle Count",
                count == expected,
                Some(format!("Expected: {expected}, Got: {count}")),
            ));
        }
        if let Some(ref check) = self.expected.time_accounting {
            checks.push(validate_time_accounting(&counters, fixed_frame_time, program_speed, check));
        }
        if let Some(ref check) = self.expected.body_drop {
            checks.push(validate_body_drop(&initial_bodies, &bodies, check));
        }
        if let Some(ref check) = self.expected.fluid_height {
            checks.push(validate_fluid_height(initial_height, positions, check));
        }
        if let Some(expected) = self.expected.rb_updates_per_frame {
            let passed = self.frames == 0 || (min_rb_updates == expected && max_rb_updates == expected);
            checks.push(CheckResult::new(
                "Rigid-Body Groups",
                passed,
                Some(format!("Expected: {expected} per frame, Got: {min_rb_updates}..={max_rb_updates}")),
            ));
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            counters,
            frames: self.frames,
            sorts,
            wall_time,
        })
    }
}

/// Dam break: a fluid column collapses in fixed-step mode.
pub fn dam_break(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Dam Break".to_string(),
        config_path: config_dir.join("dam_break.json").to_string_lossy().to_string(),
        frames: 300,
        frame_time: 1.0 / 60.0,
        backend: None,
        expected: ExpectedResult {
            within_boundary: true,
            particle_count: Some(26 * 35),
            time_accounting: Some(TimeAccountingCheck { tolerance: 1e-4 }),
            body_drop: None,
            rb_updates_per_frame: Some(0),
            fluid_height: Some(FluidHeightCheck { max_rise: 0.5 }),
        },
    }
}

/// Body drop: a heavy box tied to a lighter one falls onto a fluid layer.
pub fn body_drop(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Body Drop".to_string(),
        config_path: config_dir.join("body_drop.json").to_string_lossy().to_string(),
        frames: 200,
        frame_time: 1.0 / 60.0,
        backend: None,
        expected: ExpectedResult {
            within_boundary: true,
            particle_count: Some(57 * 8),
            time_accounting: Some(TimeAccountingCheck { tolerance: 1e-4 }),
            body_drop: Some(BodyDropCheck { body: 0, min_drop: 3.0 }),
            rb_updates_per_frame: Some(9),
            fluid_height: Some(FluidHeightCheck { max_rise: 2.0 }),
        },
    }
}

/// Multi-rate coupling with particle springs in dynamic-step mode.
pub fn multi_rate(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Multi-Rate Springs".to_string(),
        config_path: config_dir.join("multi_rate.json").to_string_lossy().to_string(),
        frames: 200,
        frame_time: 1.0 / 60.0,
        backend: None,
        expected: ExpectedResult {
            within_boundary: true,
            particle_count: Some(15 * 12),
            time_accounting: Some(TimeAccountingCheck { tolerance: 1e-4 }),
            body_drop: None,
            // 2 outer steps, groups starting at sub-steps 0 and 3
            rb_updates_per_frame: Some(4),
            fluid_height: None,
        },
    }
}

/// Every reference scenario, reading configs from `config_dir`
pub fn all_tests(config_dir: &Path) -> Vec<ReferenceTest> {
    vec![dam_break(config_dir), body_drop(config_dir), multi_rate(config_dir)]
}

/// Validate that particles and body centres stay in `[0, boundary]`
fn validate_within_boundary(particles: &[Vec2], bodies: &[Vec2], boundary: Vec2) -> CheckResult {
    let inside = |p: &Vec2| p.x >= 0.0 && p.y >= 0.0 && p.x <= boundary.x && p.y <= boundary.y;
    let outside_particles = particles.iter().filter(|p| !inside(p)).count();
    let outside_bodies = bodies.iter().filter(|p| !inside(p)).count();

    if outside_particles == 0 && outside_bodies == 0 {
        CheckResult::new("Within Boundary", true, None)
    } else {
        CheckResult::new(
            "Within Boundary",
            false,
            Some(format!(
                "{} particles and {} bodies outside [0, {}] x [0, {}]",
                outside_particles, outside_bodies, boundary.x, boundary.y
            )),
        )
    }
}

/// Validate simulated time against the time-step policy. Every frame of the
/// run must be simulated.
fn validate_time_accounting(
    counters: &Counters,
    fixed_frame_time: Option<f64>,
    program_speed: f64,
    check: &TimeAccountingCheck,
) -> CheckResult {
    let expected = match fixed_frame_time {
        // fixed mode advances the same amount every frame whatever the wall clock
        Some(per_frame) => counters.frame_count as f64 * per_frame,
        None => counters.total_scaled_time * program_speed,
    };
    let error = (counters.sim_time - expected).abs() / expected.abs().max(1e-9);
    CheckResult::new(
        "Time Accounting",
        error <= check.tolerance && counters.sim_time.is_finite(),
        Some(format!(
            "Simulated: {:.5} s, Expected: {:.5} s (error: {:.3}%)",
            counters.sim_time,
            expected,
            error * 100.0
        )),
    )
}

fn mean_height(particles: &[Vec2]) -> f32 {
    if particles.is_empty() {
        return 0.0;
    }
    particles.iter().map(|p| p.y).sum::<f32>() / particles.len() as f32
}

/// Validate that the mean particle height rose by at most `max_rise`
fn validate_fluid_height(initial: f32, particles: &[Vec2], check: &FluidHeightCheck) -> CheckResult {
    let current = mean_height(particles);
    let highest = particles.iter().map(|p| p.y).fold(0.0_f32, f32::max);
    CheckResult::new(
        "Fluid Height",
        current - initial <= check.max_rise,
        Some(format!(
            "Mean height {:.3} -> {:.3} (max rise {:.3}), highest particle {:.3}",
            initial, current, check.max_rise, highest
        )),
    )
}

/// Validate that a body moved down by at least `min_drop`
fn validate_body_drop(initial: &[Vec2], current: &[Vec2], check: &BodyDropCheck) -> CheckResult {
    let (Some(before), Some(after)) = (initial.get(check.body), current.get(check.body)) else {
        return CheckResult::new("Body Drop", false, Some(format!("No rigid body {}", check.body)));
    };
    let drop = before.y - after.y;
    CheckResult::new(
        "Body Drop",
        drop >= check.min_drop,
        Some(format!("Body {} fell {:.3} (minimum {:.3})", check.body, drop, check.min_drop)),
    )
}

impl TestResult {
    /// Print a summary of the scenario result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Scenario: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Frames: {}", self.frames);
        println!("Sub-steps: {}", self.counters.step_count);
        println!("Simulated time: {:.6} s", self.counters.sim_time);
        println!("Index rebuilds: {}", self.sorts);
        println!(
            "Wall time: {:.3} s ({:.1} frames/s)",
            self.wall_time,
            self.frames as f64 / self.wall_time.max(1e-9)
        );
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
