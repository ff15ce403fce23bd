//! Frame delta-time policy.
//!
//! Every frame yields one base sub-step delta, shared by all sub-steps of the
//! frame, plus the scaled-time increment used for host bookkeeping.

use crate::config::{SimulationConfig, TimeStepMode};

/// Replaces non-positive or NaN frame times before any division.
pub const SMALL_DELTA: f32 = 1.0e-6;

/// Deltas derived from one host frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameDeltas {
    /// Host frame time after sanitizing and clamping to `max_frame_time`.
    pub frame_time: f32,
    /// Simulation delta of one sub-step.
    pub delta_time: f32,
    /// Per-sub-step delta from the raw (unclamped) frame time.
    pub rl_delta_time: f32,
    /// Scaled time this frame accounts for.
    pub scaled_time: f32,
    /// Whether the dynamic step hit the `time_step` cap.
    pub clamped: bool,
}

/// Fixed / dynamic time-step policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStepPolicy {
    /// Delta mode.
    pub mode: TimeStepMode,
    /// Frame time step (fixed) or per-sub-step cap (dynamic).
    pub time_step: f32,
    /// Host time scale.
    pub time_scale: f32,
    /// Simulation speed multiplier.
    pub program_speed: f32,
    /// Program speed divisor while slow motion is active.
    pub slow_motion_factor: f32,
    /// Frame time clamp.
    pub max_frame_time: f32,
    /// Outer steps per frame.
    pub outer_steps: u32,
    /// Sub-steps per outer step.
    pub sub_steps: u32,
}

impl TimeStepPolicy {
    /// Policy from a validated configuration.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            mode: config.time_step_mode,
            time_step: config.time_step,
            time_scale: config.time_scale,
            program_speed: config.program_speed,
            slow_motion_factor: config.slow_motion_factor,
            max_frame_time: config.max_frame_time,
            outer_steps: config.outer_steps,
            sub_steps: config.sub_steps,
        }
    }

    /// Sub-steps per frame.
    pub fn steps_per_frame(&self) -> u32 {
        self.outer_steps * self.sub_steps
    }

    /// Program speed with slow motion applied.
    pub fn effective_speed(&self, slow_motion: bool) -> f32 {
        if slow_motion {
            self.program_speed / self.slow_motion_factor
        } else {
            self.program_speed
        }
    }

    /// Whether frames advance simulation time at all. A zero time scale or
    /// program speed holds the simulation like a pause.
    pub fn is_running(&self, slow_motion: bool) -> bool {
        self.time_scale > 0.0 && self.effective_speed(slow_motion) > 0.0
    }

    /// Compute this frame's deltas from the host's elapsed wall-clock time.
    pub fn frame_deltas(&self, elapsed: f32, slow_motion: bool) -> FrameDeltas {
        let raw = sanitize(elapsed);
        let frame_time = raw.min(self.max_frame_time);
        let slow = if slow_motion { self.slow_motion_factor } else { 1.0 };
        let mut scaled_time = frame_time * self.time_scale / slow;

        let (delta_time, clamped) = self.sub_step_delta(frame_time, slow_motion, true);
        let (rl_delta_time, _) = self.sub_step_delta(raw, slow_motion, false);

        if let Some(ratio) = clamped {
            scaled_time *= ratio;
        }

        FrameDeltas {
            frame_time,
            delta_time,
            rl_delta_time,
            scaled_time,
            clamped: clamped.is_some(),
        }
    }

    /// Sub-step delta for `frame_time`, never below [`SMALL_DELTA`]. The
    /// second value is `clamped / unclamped` when the `time_step` cap applied.
    fn sub_step_delta(&self, frame_time: f32, slow_motion: bool, clamp: bool) -> (f32, Option<f32>) {
        let steps = self.steps_per_frame().max(1) as f32;
        let speed = self.time_scale * self.effective_speed(slow_motion);
        let (delta, ratio) = match self.mode {
            TimeStepMode::Fixed => (self.time_step / steps * speed, None),
            TimeStepMode::Dynamic => {
                let delta = frame_time / steps * speed;
                if clamp && delta > self.time_step {
                    (self.time_step, Some(self.time_step / delta))
                } else {
                    (delta, None)
                }
            }
        };
        (delta.max(SMALL_DELTA), ratio)
    }
}

fn sanitize(elapsed: f32) -> f32 {
    if elapsed > 0.0 {
        elapsed
    } else {
        SMALL_DELTA
    }
}

/// Rigid-body groups of one outer step: `(first sub-step, delta)` for every
/// sub-step `j` with `j % divisor == 0`, each covering `min(divisor,
/// sub_steps - j)` sub-steps.
pub fn rigid_body_groups(sub_steps: u32, divisor: u32, base_dt: f32) -> impl Iterator<Item = (u32, f32)> {
    let k = divisor.max(1);
    (0..sub_steps)
        .step_by(k as usize)
        .map(move |j| (j, k.min(sub_steps - j) as f32 * base_dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn policy(mode: TimeStepMode) -> TimeStepPolicy {
        let mut config = SimulationConfig::new(16, 1.0, Vec2::splat(10.0));
        config.time_step_mode = mode;
        TimeStepPolicy::from_config(&config)
    }

    #[test]
    fn fixed_ignores_wall_clock() {
        let p = policy(TimeStepMode::Fixed);
        let a = p.frame_deltas(0.001, false);
        let b = p.frame_deltas(0.09, false);
        assert_eq!(a.delta_time, b.delta_time);
        // 0.02 / 9 * 1 * 2
        assert!((a.delta_time - 0.02 / 9.0 * 2.0).abs() < 1e-9);
        assert!(!a.clamped);
    }

    #[test]
    fn zero_speed_is_not_running_and_deltas_stay_positive() {
        for mode in [TimeStepMode::Fixed, TimeStepMode::Dynamic] {
            let mut p = policy(mode);
            assert!(p.is_running(false));
            p.program_speed = 0.0;
            assert!(!p.is_running(false));
            assert!(!p.is_running(true));
            let d = p.frame_deltas(0.016, false);
            assert_eq!(d.delta_time, SMALL_DELTA);
            assert_eq!(d.rl_delta_time, SMALL_DELTA);

            let mut p = policy(mode);
            p.time_scale = 0.0;
            assert!(!p.is_running(false));
            assert_eq!(p.frame_deltas(0.016, false).delta_time, SMALL_DELTA);
        }
    }

    #[test]
    fn dynamic_follows_frame_time() {
        let p = policy(TimeStepMode::Dynamic);
        let d = p.frame_deltas(0.018, false);
        assert!((d.delta_time - 0.004).abs() < 1e-7);
        assert!(!d.clamped);
        assert!((d.scaled_time - 0.018).abs() < 1e-7);
    }

    #[test]
    fn dynamic_clamps_and_corrects_scaled_time() {
        let mut p = policy(TimeStepMode::Dynamic);
        p.time_step = 0.005;
        let d = p.frame_deltas(0.09, false);
        assert!(d.clamped);
        assert_eq!(d.delta_time, 0.005);
        // simulated time = scaled time * program speed
        let simulated = d.delta_time * p.steps_per_frame() as f32;
        assert!((simulated - d.scaled_time * p.program_speed).abs() < 1e-6);
    }

    #[test]
    fn frame_time_is_clamped_but_rl_delta_is_not() {
        let p = policy(TimeStepMode::Dynamic);
        let d = p.frame_deltas(2.0, false);
        assert_eq!(d.frame_time, p.max_frame_time);
        assert!(d.rl_delta_time > d.delta_time);
        assert!((d.rl_delta_time - 2.0 / 9.0 * 2.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_elapsed_uses_small_delta() {
        let p = policy(TimeStepMode::Dynamic);
        for elapsed in [0.0, -1.0, f32::NAN] {
            let d = p.frame_deltas(elapsed, false);
            assert_eq!(d.frame_time, SMALL_DELTA);
            assert!(d.delta_time > 0.0 && d.delta_time.is_finite());
        }
    }

    #[test]
    fn slow_motion_divides_speed() {
        let p = policy(TimeStepMode::Fixed);
        let normal = p.frame_deltas(0.016, false);
        let slow = p.frame_deltas(0.016, true);
        assert!((normal.delta_time / slow.delta_time - 4.0).abs() < 1e-5);
        assert!((normal.scaled_time / slow.scaled_time - 4.0).abs() < 1e-5);
    }

    #[test]
    fn groups_cover_every_sub_step() {
        for (sub, k) in [(3, 1), (3, 2), (3, 3), (3, 5), (7, 3)] {
            let groups: Vec<_> = rigid_body_groups(sub, k, 1.0).collect();
            assert_eq!(groups.len() as u32, sub.div_ceil(k), "sub={sub} k={k}");
            let covered: f32 = groups.iter().map(|&(_, dt)| dt).sum();
            assert_eq!(covered, sub as f32, "sub={sub} k={k}");
        }
        let groups: Vec<_> = rigid_body_groups(3, 2, 0.5).collect();
        assert_eq!(groups, vec![(0, 1.0), (2, 0.5)]);
    }
}
