//! Explorer configuration
//!
//! Everything a sweep needs is fixed up front in one immutable
//! [`ExplorerConfig`], usually read from TOML. Every section is optional and
//! falls back to the defaults below.
//!
//! ```toml
//! tolerance = 1e-10
//! mode = "a"            # "a", "b" or "combined"
//! tie_break = "prefer_a"
//!
//! [events]
//! a = 6                 # x-axis crossings
//! b = 0                 # y-axis crossings
//!
//! [grid]
//! width = 400
//! height = 200
//! velocity_origin = [-4.0, 0.0]
//! velocity_step = 0.02
//!
//! [model]
//! law = "degree_force"
//! degree = 0.0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detector::{DetectorSettings, EventTargets};
use crate::events::TieBreak;
use crate::model::{Axis, ForceModel};
use crate::norm::CompositeMode;
use crate::sweep::GridSpec;

/// Configuration rejected before any integration starts
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Tolerance not positive or not finite
    #[error("tolerance must be positive and finite, got {0}")]
    InvalidTolerance(f64),
    /// A grid dimension is zero
    #[error("grid dimensions must be positive, got {width}x{height}")]
    EmptyGrid {
        /// Configured width
        width: usize,
        /// Configured height
        height: usize,
    },
    /// A grid coordinate is NaN or infinite
    #[error("grid parameter `{0}` must be finite")]
    NonFiniteGrid(&'static str),
    /// Force-model parameters out of range
    #[error("invalid model: {0}")]
    InvalidModel(String),
    /// Any other out-of-range setting
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    /// The config file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was requested
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Crossing counts and the signals they count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Crossings of signal A to wait for
    pub a: u32,
    /// Crossings of signal B to wait for
    pub b: u32,
    /// Coordinate used as signal A
    pub signal_a: Axis,
    /// Coordinate used as signal B
    pub signal_b: Axis,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            a: 6,
            b: 0,
            signal_a: Axis::Y,
            signal_b: Axis::X,
        }
    }
}

/// A series of frames with the force-law degree stepped before each one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnimationConfig {
    /// Number of frames to compute
    pub frames: usize,
    /// Added to `model.degree` before every frame
    pub degree_step: f64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            frames: 1,
            degree_step: 0.1,
        }
    }
}

/// Where frames are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Output directory
    pub directory: PathBuf,
    /// File stem shared by every frame
    pub base_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            base_name: "img".to_string(),
        }
    }
}

/// Complete, immutable description of one exploration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorerConfig {
    /// Integration and refinement tolerance
    pub tolerance: f64,
    /// How crossing counts turn into a norm
    pub mode: CompositeMode,
    /// Signal preference when a composite event ends on a shared interval
    pub tie_break: TieBreak,
    /// Counting-loop step cap per detector call
    pub max_steps: u64,
    /// Bisection cap per detector call
    pub max_refinements: usize,
    /// Worker threads for the sweep; 0 uses the global rayon pool
    pub threads: usize,
    /// Event counts and signals
    pub events: EventsConfig,
    /// Initial-condition grid
    pub grid: GridSpec,
    /// Dynamical model
    pub model: ForceModel,
    /// Frame series
    pub animation: AnimationConfig,
    /// Output location
    pub output: OutputConfig,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        let detector = DetectorSettings::default();
        Self {
            tolerance: detector.tolerance,
            mode: CompositeMode::A,
            tie_break: detector.tie_break,
            max_steps: detector.max_steps,
            max_refinements: detector.max_refinements,
            threads: 0,
            events: EventsConfig::default(),
            grid: GridSpec::default(),
            model: ForceModel::default(),
            animation: AnimationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl ExplorerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Check every setting a sweep depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector_settings().validate()?;
        if self.animation.frames == 0 {
            return Err(ConfigError::InvalidSetting(
                "animation.frames must be at least 1".to_string(),
            ));
        }
        if !self.animation.degree_step.is_finite() {
            return Err(ConfigError::InvalidSetting(
                "animation.degree_step must be finite".to_string(),
            ));
        }
        if self.output.base_name.is_empty() {
            return Err(ConfigError::InvalidSetting(
                "output.base_name must not be empty".to_string(),
            ));
        }
        self.grid.validate()?;
        self.model.validate()
    }

    /// Detector settings derived from this configuration.
    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            tolerance: self.tolerance,
            max_steps: self.max_steps,
            max_refinements: self.max_refinements,
            tie_break: self.tie_break,
            ..Default::default()
        }
    }

    /// Crossing targets for the norm evaluator.
    pub fn targets(&self) -> EventTargets {
        EventTargets::new(self.events.a, self.events.b)
    }

    /// Model used for frame `index` of the animation.
    ///
    /// The degree is advanced before every frame, so frame 0 already runs
    /// at `degree + degree_step`. A single-frame run uses the model as
    /// configured.
    pub fn model_for_frame(&self, index: usize) -> ForceModel {
        let mut model = self.model.clone();
        if self.animation.frames > 1 {
            model.degree += self.animation.degree_step * (index + 1) as f64;
        }
        model
    }
}
