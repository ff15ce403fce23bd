//! Configuration parsing and validation for the simulation core

use glam::Vec2;
use kernel::{ParticleMaterial, PrecisionTable, RigidBodyDesc, WorldConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was requested
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the per-sub-step delta time is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeStepMode {
    /// Constant delta from `time_step`, independent of the wall clock
    Fixed,
    /// Delta follows the host frame time, clamped to `time_step`
    #[default]
    Dynamic,
}

/// Where dispatch lanes execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendChoice {
    /// Single-threaded, lane order 0..N
    Serial,
    /// Thread pool with `threads` workers (0 = one per core)
    Parallel {
        /// Worker count
        #[serde(default)]
        threads: usize,
    },
}

impl Default for BackendChoice {
    fn default() -> Self {
        Self::Parallel { threads: 0 }
    }
}

/// Rectangular block of fluid particles laid out on a square lattice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluidBlock {
    /// Lower-left corner
    pub min: Vec2,
    /// Upper-right corner
    pub max: Vec2,
    /// Lattice spacing
    pub spacing: f32,
    /// Initial velocity of every particle
    #[serde(default)]
    pub velocity: Vec2,
    /// Particle type (material index)
    #[serde(default)]
    pub particle_type: u32,
}

/// Initial scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Fluid regions spawned at scene start
    #[serde(default)]
    pub fluid_blocks: Vec<FluidBlock>,
    /// Rigid bodies spawned at scene start
    #[serde(default)]
    pub rigid_bodies: Vec<RigidBodyDesc>,
    /// Material per particle type
    #[serde(default)]
    pub materials: Vec<ParticleMaterial>,
    /// Gravity vector
    #[serde(default = "default_gravity")]
    pub gravity: Vec2,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            fluid_blocks: Vec::new(),
            rigid_bodies: Vec::new(),
            materials: Vec::new(),
            gravity: default_gravity(),
        }
    }
}

/// Main simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    #[serde(default = "default_name")]
    pub name: String,
    /// Maximum number of particles
    pub particle_capacity: usize,
    /// Upper bound of springs owned by one particle
    #[serde(default = "default_max_springs")]
    pub max_springs_per_particle: u32,
    /// Neighbour search radius (also the grid cell size)
    pub influence_radius: f32,
    /// Simulation box size
    pub boundary: Vec2,
    /// Outer time steps per frame
    #[serde(default = "default_outer_steps")]
    pub outer_steps: u32,
    /// Sub-steps per outer time step
    #[serde(default = "default_sub_steps")]
    pub sub_steps: u32,
    /// Rigid bodies update once every this many sub-steps
    #[serde(default = "default_rb_divisor")]
    pub rb_update_divisor: u32,
    /// Fixed-point precision per accumulation domain
    #[serde(default)]
    pub precision: PrecisionTable,
    /// Delta time policy
    #[serde(default)]
    pub time_step_mode: TimeStepMode,
    /// Frame time step (fixed mode) or per-sub-step cap (dynamic mode)
    #[serde(default = "default_time_step")]
    pub time_step: f32,
    /// Host time scale
    #[serde(default = "default_time_scale")]
    pub time_scale: f32,
    /// Simulation speed multiplier
    #[serde(default = "default_program_speed")]
    pub program_speed: f32,
    /// Program speed divisor while slow motion is active
    #[serde(default = "default_slow_motion_factor")]
    pub slow_motion_factor: f32,
    /// Host frame times above this are clamped (seconds)
    #[serde(default = "default_max_frame_time")]
    pub max_frame_time: f32,
    /// Pointer influence radius
    #[serde(default = "default_interaction_radius")]
    pub interaction_radius: f32,
    /// Pointer influence strength
    #[serde(default = "default_interaction_strength")]
    pub interaction_strength: f32,
    /// Whether particle springs are simulated
    #[serde(default)]
    pub springs_enabled: bool,
    /// Maximum number of particles waiting for admission
    #[serde(default = "default_max_pending")]
    pub max_pending_particles: usize,
    /// Execution backend
    #[serde(default)]
    pub backend: BackendChoice,
    /// Frames per second the runner paces itself to
    #[serde(default = "default_target_frame_rate")]
    pub target_frame_rate: f32,
    /// Runner stops after this many frames
    pub max_frames: Option<u64>,
    /// Runner stops after this much simulated time
    pub max_time: Option<f64>,
    /// Initial scene
    #[serde(default)]
    pub scene: SceneConfig,
}

// Default values
fn default_name() -> String {
    "untitled".to_string()
}

fn default_gravity() -> Vec2 {
    Vec2::new(0.0, -5.0)
}

fn default_max_springs() -> u32 {
    4
}

fn default_outer_steps() -> u32 {
    3
}

fn default_sub_steps() -> u32 {
    3
}

fn default_rb_divisor() -> u32 {
    1
}

fn default_time_step() -> f32 {
    0.02
}

fn default_time_scale() -> f32 {
    1.0
}

fn default_program_speed() -> f32 {
    2.0
}

fn default_slow_motion_factor() -> f32 {
    4.0
}

fn default_max_frame_time() -> f32 {
    0.1
}

fn default_interaction_radius() -> f32 {
    5.0
}

fn default_interaction_strength() -> f32 {
    20.0
}

fn default_max_pending() -> usize {
    65_536
}

fn default_target_frame_rate() -> f32 {
    60.0
}

impl SimulationConfig {
    /// Configuration with every optional field at its default
    pub fn new(particle_capacity: usize, influence_radius: f32, boundary: Vec2) -> Self {
        Self {
            name: default_name(),
            particle_capacity,
            max_springs_per_particle: default_max_springs(),
            influence_radius,
            boundary,
            outer_steps: default_outer_steps(),
            sub_steps: default_sub_steps(),
            rb_update_divisor: default_rb_divisor(),
            precision: PrecisionTable::default(),
            time_step_mode: TimeStepMode::default(),
            time_step: default_time_step(),
            time_scale: default_time_scale(),
            program_speed: default_program_speed(),
            slow_motion_factor: default_slow_motion_factor(),
            max_frame_time: default_max_frame_time(),
            interaction_radius: default_interaction_radius(),
            interaction_strength: default_interaction_strength(),
            springs_enabled: false,
            max_pending_particles: default_max_pending(),
            backend: BackendChoice::default(),
            target_frame_rate: default_target_frame_rate(),
            max_frames: None,
            max_time: None,
            scene: SceneConfig::default(),
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.particle_capacity == 0 {
            return invalid("particle_capacity must be at least 1");
        }
        if !(self.influence_radius > 0.0) || !self.influence_radius.is_finite() {
            return invalid("influence_radius must be positive");
        }
        if self.boundary.x < self.influence_radius || self.boundary.y < self.influence_radius {
            return invalid("boundary must be at least one influence radius in each axis");
        }
        if self.outer_steps == 0 || self.sub_steps == 0 {
            return invalid("outer_steps and sub_steps must be at least 1");
        }
        if self.rb_update_divisor == 0 {
            return invalid("rb_update_divisor must be at least 1");
        }
        if self.precision.iter().any(|(_, p)| !(p > 0.0)) {
            return invalid("every precision must be positive");
        }
        if !(self.time_step > 0.0) {
            return invalid("time_step must be positive");
        }
        if !(self.time_scale >= 0.0) {
            return invalid("time_scale must be non-negative");
        }
        if !(self.program_speed >= 0.0) {
            return invalid("program_speed must be non-negative");
        }
        if !(self.slow_motion_factor >= 1.0) {
            return invalid("slow_motion_factor must be at least 1");
        }
        if !(self.max_frame_time > 0.0) {
            return invalid("max_frame_time must be positive");
        }
        if self.interaction_radius < 0.0 {
            return invalid("interaction_radius must be non-negative");
        }
        if !(self.target_frame_rate > 0.0) {
            return invalid("target_frame_rate must be positive");
        }
        if self.max_frames == Some(0) {
            return invalid("max_frames must be at least 1");
        }
        if let Some(max_time) = self.max_time {
            if !(max_time > 0.0) {
                return invalid("max_time must be positive");
            }
        }

        for (i, block) in self.scene.fluid_blocks.iter().enumerate() {
            if !(block.spacing > 0.0) {
                return Err(ConfigError::Invalid(format!("fluid block {i}: spacing must be positive")));
            }
            if block.min.x > block.max.x || block.min.y > block.max.y {
                return Err(ConfigError::Invalid(format!("fluid block {i}: min must not exceed max")));
            }
        }

        let bodies = self.scene.rigid_bodies.len();
        for (i, body) in self.scene.rigid_bodies.iter().enumerate() {
            if body.vertices.len() < 3 {
                return Err(ConfigError::Invalid(format!("rigid body {i}: needs at least 3 vertices")));
            }
            if body.mass < 0.0 {
                return Err(ConfigError::Invalid(format!("rigid body {i}: mass must be non-negative")));
            }
            if let Some(link) = body.linked_body {
                if link as usize >= bodies || link as usize == i {
                    return Err(ConfigError::Invalid(format!("rigid body {i}: invalid spring link {link}")));
                }
            }
        }

        Ok(())
    }

    /// Kernel world sizing derived from this configuration
    pub fn world_config(&self) -> WorldConfig {
        WorldConfig {
            particle_capacity: self.particle_capacity,
            max_springs_per_particle: self.max_springs_per_particle,
            influence_radius: self.influence_radius,
            boundary: self.boundary,
            precision: self.precision,
            materials: self.scene.materials.clone(),
        }
    }

    /// Sub-steps per frame
    pub fn steps_per_frame(&self) -> u32 {
        self.outer_steps * self.sub_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig::new(1024, 2.0, Vec2::new(20.0, 20.0))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.steps_per_frame(), 9);
        assert_eq!(config.precision.rigid_body, 50_000.0);
    }

    #[test]
    fn test_minimal_json() {
        let config = SimulationConfig::from_json(
            r#"{ "particle_capacity": 256, "influence_radius": 1.5, "boundary": [30.0, 15.0] }"#,
        )
        .unwrap();
        assert_eq!(config.outer_steps, 3);
        assert_eq!(config.sub_steps, 3);
        assert_eq!(config.rb_update_divisor, 1);
        assert_eq!(config.time_step, 0.02);
        assert_eq!(config.program_speed, 2.0);
        assert_eq!(config.backend, BackendChoice::Parallel { threads: 0 });
        assert_eq!(config.time_step_mode, TimeStepMode::Dynamic);
        assert!(config.scene.fluid_blocks.is_empty());
    }

    #[test]
    fn test_backend_choice() {
        assert_eq!(BackendChoice::default(), BackendChoice::Parallel { threads: 0 });
        let parallel: BackendChoice = serde_json::from_str(r#"{ "Parallel": {} }"#).unwrap();
        assert_eq!(parallel, BackendChoice::default());
        let serial: BackendChoice = serde_json::from_str(r#""Serial""#).unwrap();
        assert_eq!(serial, BackendChoice::Serial);
    }

    #[test]
    fn test_full_scene_json() {
        let config = SimulationConfig::from_json(
            r#"{
                "particle_capacity": 256,
                "influence_radius": 1.0,
                "boundary": [10.0, 10.0],
                "time_step_mode": "Fixed",
                "backend": "Serial",
                "precision": { "rigid_body": 1000.0 },
                "scene": {
                    "fluid_blocks": [{ "min": [1.0, 1.0], "max": [3.0, 3.0], "spacing": 0.5 }],
                    "rigid_bodies": [{
                        "pos": [5.0, 5.0],
                        "mass": 2.0,
                        "vertices": [[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]]
                    }],
                    "gravity": [0.0, -9.81]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.time_step_mode, TimeStepMode::Fixed);
        assert_eq!(config.backend, BackendChoice::Serial);
        assert_eq!(config.precision.rigid_body, 1000.0);
        assert_eq!(config.precision.particle, PrecisionTable::default().particle);
        assert_eq!(config.scene.rigid_bodies.len(), 1);
        assert_eq!(config.scene.gravity, Vec2::new(0.0, -9.81));
    }

    #[test]
    fn test_validation_radius_and_capacity() {
        let mut config = config();
        config.influence_radius = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.influence_radius = 25.0;
        assert!(config.validate().is_err(), "boundary smaller than one cell");

        config.influence_radius = 2.0;
        config.particle_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_steps() {
        let mut config = config();
        config.rb_update_divisor = 0;
        assert!(config.validate().is_err());
        config.rb_update_divisor = 5;
        config.sub_steps = 0;
        assert!(config.validate().is_err());
        config.sub_steps = 2;
        assert!(config.validate().is_ok(), "divisor may exceed the sub-step count");
    }

    #[test]
    fn test_validation_scene() {
        let mut config = config();
        config.scene.rigid_bodies.push(RigidBodyDesc {
            pos: Vec2::ONE,
            vel: Vec2::ZERO,
            rot_vel: 0.0,
            mass: 1.0,
            vertices: vec![Vec2::X, Vec2::Y],
            linked_body: None,
            spring_rest_length: 0.0,
            spring_stiffness: 0.0,
        });
        assert!(config.validate().is_err(), "two vertices");

        config.scene.rigid_bodies[0].vertices.push(-Vec2::X);
        config.scene.rigid_bodies[0].linked_body = Some(0);
        assert!(config.validate().is_err(), "self link");

        config.scene.rigid_bodies[0].linked_body = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = SimulationConfig::load("does/not/exist.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
