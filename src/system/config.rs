//! Navigation configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! The struct is immutable once the system is running; the only
//! runtime-adjustable value (the overlap threshold) lives in
//! [`SharedState`](super::SharedState).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};
use crate::estimation::registry::{EstimatorRegistry, EstimatorSpec};
use crate::geometry::Crs;

/// Where estimation tasks run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Dedicated worker thread in this process.
    #[default]
    InProcess,
    /// Child process speaking the worker wire protocol over stdio.
    OutOfProcess,
}

/// Map refresh settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MapUpdateConfig {
    /// Minimum fraction of the projected camera footprint that must lie
    /// inside the cached raster. Default: 0.5
    pub overlap_threshold: f64,

    /// Relative tolerance between cached and altitude-implied resolution.
    /// Default: 0.5
    pub resolution_tolerance: f64,

    /// Requested raster width and height in pixels. Default: 512
    pub map_size_px: u32,

    /// Map radius as a multiple of `hfov × altitude_agl`. Default: 1.5
    pub radius_padding: f64,

    /// Upper bound on the map radius (metres). Default: 400
    pub max_map_radius_m: f64,

    /// Centre requests on the projected field of view rather than on the
    /// vehicle. Default: true
    pub center_on_fov: bool,
}

impl Default for MapUpdateConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.5,
            resolution_tolerance: 0.5,
            map_size_px: 512,
            radius_padding: 1.5,
            max_map_radius_m: 400.0,
            center_on_fov: true,
        }
    }
}

/// Pose estimation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Initial backend and its construction arguments.
    pub estimator: EstimatorSpec,

    pub execution: ExecutionKind,

    /// Worker executable for out-of-process execution. Defaults to the
    /// current executable.
    pub worker_program: Option<PathBuf>,

    /// Skip frames whose optical axis is further off nadir (degrees).
    /// Default: 10
    pub max_off_nadir_deg: f64,

    /// Skip frames below this altitude above ground (metres). Default: 20
    pub min_match_altitude_m: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorSpec::new("patch_keypoint"),
            execution: ExecutionKind::InProcess,
            worker_program: None,
            max_off_nadir_deg: 10.0,
            min_match_altitude_m: 20.0,
        }
    }
}

/// Recursive filter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// White-noise acceleration spectral density (m/s²/√Hz). Default: 1.0
    pub acceleration_noise: f64,

    /// Attitude random-walk density (rad/√s). Default: 0.02
    pub attitude_noise: f64,

    /// Horizontal position measurement std (m). Default: 5.0
    pub horizontal_measurement_std_m: f64,

    /// Vertical position measurement std (m). Default: 10.0
    pub vertical_measurement_std_m: f64,

    /// Attitude measurement std (rad). Default: 0.05
    pub attitude_measurement_std_rad: f64,

    /// Velocity std used when seeding (m/s). Default: 5.0
    pub initial_velocity_std: f64,

    /// Horizontal std above which the filter is considered diverged (m).
    /// Default: 100
    pub divergence_std_m: f64,

    /// Hypotheses older than this at tick time are discarded (s).
    /// Default: 2.0
    pub max_hypothesis_age_s: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            acceleration_noise: 1.0,
            attitude_noise: 0.02,
            horizontal_measurement_std_m: 5.0,
            vertical_measurement_std_m: 10.0,
            attitude_measurement_std_rad: 0.05,
            initial_velocity_std: 5.0,
            divergence_std_m: 100.0,
            max_hypothesis_age_s: 2.0,
        }
    }
}

/// Output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Coordinate reference system tag of published records.
    pub crs: String,

    /// Also publish GNSS-style messages.
    pub publish_gps: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            crs: Crs::Wgs84.as_str().to_string(),
            publish_gps: true,
        }
    }
}

/// Full navigation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NavConfig {
    /// Filter tick rate (Hz). Default: 10
    #[serde(default = "default_cadence_hz")]
    pub cadence_hz: f64,

    #[serde(default)]
    pub map_update: MapUpdateConfig,

    #[serde(default)]
    pub estimation: EstimationConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

fn default_cadence_hz() -> f64 {
    10.0
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            cadence_hz: default_cadence_hz(),
            map_update: MapUpdateConfig::default(),
            estimation: EstimationConfig::default(),
            filter: FilterConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl NavConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: NavConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> f64 {
        1.0 / self.cadence_hz
    }

    pub fn crs(&self) -> Result<Crs> {
        self.output.crs.parse()
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.validate_with(&EstimatorRegistry::builtin())
    }

    /// [`validate`](Self::validate) against a custom estimator registry.
    pub fn validate_with(&self, registry: &EstimatorRegistry) -> Result<()> {
        fn positive(name: &str, v: f64) -> Result<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(NavError::Config(format!("{} must be positive, got {}", name, v)))
            }
        }

        positive("cadence_hz", self.cadence_hz)?;

        let m = &self.map_update;
        if !(m.overlap_threshold > 0.0 && m.overlap_threshold <= 1.0) {
            return Err(NavError::Config(format!(
                "map_update.overlap_threshold must be in (0, 1], got {}",
                m.overlap_threshold
            )));
        }
        positive("map_update.resolution_tolerance", m.resolution_tolerance)?;
        positive("map_update.radius_padding", m.radius_padding)?;
        positive("map_update.max_map_radius_m", m.max_map_radius_m)?;
        if m.map_size_px < 32 {
            return Err(NavError::Config(format!(
                "map_update.map_size_px must be at least 32, got {}",
                m.map_size_px
            )));
        }

        let e = &self.estimation;
        positive("estimation.max_off_nadir_deg", e.max_off_nadir_deg)?;
        if !(e.min_match_altitude_m.is_finite() && e.min_match_altitude_m >= 0.0) {
            return Err(NavError::Config("estimation.min_match_altitude_m must be non-negative".into()));
        }
        registry.check(&e.estimator)?;

        let f = &self.filter;
        positive("filter.acceleration_noise", f.acceleration_noise)?;
        positive("filter.attitude_noise", f.attitude_noise)?;
        positive("filter.horizontal_measurement_std_m", f.horizontal_measurement_std_m)?;
        positive("filter.vertical_measurement_std_m", f.vertical_measurement_std_m)?;
        positive("filter.attitude_measurement_std_rad", f.attitude_measurement_std_rad)?;
        positive("filter.initial_velocity_std", f.initial_velocity_std)?;
        positive("filter.divergence_std_m", f.divergence_std_m)?;
        positive("filter.max_hypothesis_age_s", f.max_hypothesis_age_s)?;
        if f.divergence_std_m <= f.horizontal_measurement_std_m {
            return Err(NavError::Config(
                "filter.divergence_std_m must exceed filter.horizontal_measurement_std_m".into(),
            ));
        }

        self.crs()?;
        Ok(())
    }
}
