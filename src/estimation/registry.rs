//! Estimator registry: backend identifier + arguments → boxed estimator.
//!
//! Construction arguments are plain numbers so an [`EstimatorSpec`] can be
//! sent by value to a worker process and rebuilt there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::correlation::{CorrelationConfig, CorrelationEstimator};
use super::estimator::{KeypointEstimatorConfig, KeypointPoseEstimator, PoseEstimator};
use super::matching::{PatchMatcher, PatchMatcherConfig};
use crate::error::{NavError, Result};

/// Backend identifier and construction arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSpec {
    pub backend: String,
    #[serde(default)]
    pub args: BTreeMap<String, f64>,
}

impl EstimatorSpec {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: f64) -> Self {
        self.args.insert(key.into(), value);
        self
    }
}

type Factory = fn(&EstimatorSpec) -> Result<Box<dyn PoseEstimator>>;

/// Named estimator factories.
pub struct EstimatorRegistry {
    factories: BTreeMap<&'static str, Factory>,
}

impl EstimatorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in backends.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("patch_keypoint", build_patch_keypoint);
        registry.register("correlation", build_correlation);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: Factory) {
        self.factories.insert(name, factory);
    }

    pub fn backends(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn build(&self, spec: &EstimatorSpec) -> Result<Box<dyn PoseEstimator>> {
        let factory = self.factories.get(spec.backend.as_str()).ok_or_else(|| {
            let known: Vec<_> = self.backends().collect();
            NavError::construction(&spec.backend, format!("unknown backend (known: {})", known.join(", ")))
        })?;
        factory(spec)
    }

    /// Validate a spec by constructing (and dropping) the estimator.
    pub fn check(&self, spec: &EstimatorSpec) -> Result<()> {
        self.build(spec).map(|_| ())
    }
}

/// Typed access to spec arguments with unknown-key detection.
struct Args<'a> {
    spec: &'a EstimatorSpec,
    allowed: &'static [&'static str],
}

impl<'a> Args<'a> {
    fn new(spec: &'a EstimatorSpec, allowed: &'static [&'static str]) -> Result<Self> {
        if let Some(unknown) = spec.args.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(NavError::construction(
                &spec.backend,
                format!("unknown argument '{}' (allowed: {})", unknown, allowed.join(", ")),
            ));
        }
        Ok(Self { spec, allowed })
    }

    fn get(&self, key: &str, default: f64) -> Result<f64> {
        debug_assert!(self.allowed.contains(&key));
        let value = self.spec.args.get(key).copied().unwrap_or(default);
        if !value.is_finite() {
            return Err(self.invalid(key, value, "must be finite"));
        }
        Ok(value)
    }

    fn positive(&self, key: &str, default: f64) -> Result<f64> {
        let value = self.get(key, default)?;
        if value <= 0.0 {
            return Err(self.invalid(key, value, "must be positive"));
        }
        Ok(value)
    }

    fn count(&self, key: &str, default: usize) -> Result<usize> {
        let value = self.get(key, default as f64)?;
        if value < 0.0 || value.fract() != 0.0 {
            return Err(self.invalid(key, value, "must be a non-negative integer"));
        }
        Ok(value as usize)
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.get(key, if default { 1.0 } else { 0.0 })? != 0.0)
    }

    fn invalid(&self, key: &str, value: f64, why: &str) -> NavError {
        NavError::construction(&self.spec.backend, format!("argument '{}' = {} {}", key, value, why))
    }
}

fn build_patch_keypoint(spec: &EstimatorSpec) -> Result<Box<dyn PoseEstimator>> {
    let args = Args::new(
        spec,
        &[
            "min_matches",
            "max_features",
            "ransac_threshold_px",
            "ransac_iterations",
            "max_attitude_deviation_deg",
            "rectify",
            "seed",
        ],
    )?;

    let mut config = KeypointEstimatorConfig::default();
    config.min_matches = args.count("min_matches", config.min_matches)?;
    config.ransac.reprojection_threshold_px = args.positive("ransac_threshold_px", config.ransac.reprojection_threshold_px)?;
    config.ransac.max_iterations = args.count("ransac_iterations", config.ransac.max_iterations)?.max(1);
    config.ransac.seed = args.count("seed", config.ransac.seed as usize)? as u64;
    config.validity.max_attitude_deviation_deg =
        args.positive("max_attitude_deviation_deg", config.validity.max_attitude_deviation_deg)?;
    config.rectify_with_prior = args.flag("rectify", config.rectify_with_prior)?;

    let matcher_config = PatchMatcherConfig {
        max_features: args.count("max_features", PatchMatcherConfig::default().max_features)?,
        ..Default::default()
    };

    Ok(Box::new(KeypointPoseEstimator::new(
        spec.backend.clone(),
        PatchMatcher::new(matcher_config),
        config,
    )))
}

fn build_correlation(spec: &EstimatorSpec) -> Result<Box<dyn PoseEstimator>> {
    let args = Args::new(
        spec,
        &[
            "search_radius_px",
            "step_px",
            "refinement_levels",
            "min_score",
            "sample_stride_px",
            "max_attitude_deviation_deg",
        ],
    )?;

    let mut config = CorrelationConfig::default();
    config.search_radius_px = args.positive("search_radius_px", config.search_radius_px)?;
    config.step_px = args.positive("step_px", config.step_px)?;
    config.refinement_levels = args.count("refinement_levels", config.refinement_levels as usize)?.min(8) as u32;
    config.min_score = args.get("min_score", config.min_score)?;
    config.sample_stride_px = args.count("sample_stride_px", config.sample_stride_px as usize)?.max(1) as u32;
    config.validity.max_attitude_deviation_deg =
        args.positive("max_attitude_deviation_deg", config.validity.max_attitude_deviation_deg)?;

    if !(-1.0..=1.0).contains(&config.min_score) {
        return Err(NavError::construction(&spec.backend, "min_score must be in [-1, 1]"));
    }
    Ok(Box::new(CorrelationEstimator::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_backends() {
        let registry = EstimatorRegistry::builtin();
        assert_eq!(registry.backends().collect::<Vec<_>>(), vec!["correlation", "patch_keypoint"]);

        let est = registry.build(&EstimatorSpec::new("patch_keypoint")).unwrap();
        assert_eq!(est.name(), "patch_keypoint");
        let est = registry.build(&EstimatorSpec::new("correlation")).unwrap();
        assert_eq!(est.name(), "correlation");
    }

    #[test]
    fn test_unknown_backend() {
        let err = EstimatorRegistry::builtin()
            .build(&EstimatorSpec::new("loftr"))
            .err()
            .unwrap();
        assert!(matches!(err, NavError::EstimatorConstruction { ref backend, .. } if backend == "loftr"));
    }

    #[test]
    fn test_argument_validation() {
        let registry = EstimatorRegistry::builtin();

        let ok = EstimatorSpec::new("patch_keypoint").with_arg("min_matches", 30.0);
        assert!(registry.check(&ok).is_ok());

        let unknown = EstimatorSpec::new("patch_keypoint").with_arg("model_path", 1.0);
        assert!(registry.check(&unknown).is_err());

        let fractional = EstimatorSpec::new("patch_keypoint").with_arg("min_matches", 2.5);
        assert!(registry.check(&fractional).is_err());

        let negative = EstimatorSpec::new("correlation").with_arg("search_radius_px", -3.0);
        assert!(registry.check(&negative).is_err());

        let bad_score = EstimatorSpec::new("correlation").with_arg("min_score", 2.0);
        assert!(registry.check(&bad_score).is_err());
    }

    #[test]
    fn test_custom_registration() {
        use crate::estimation::ImagePair;
        use crate::geometry::Pose;

        struct Never;
        impl PoseEstimator for Never {
            fn name(&self) -> &str {
                "never"
            }
            fn estimate(&mut self, _: &ImagePair, _: Option<&Pose>) -> Option<Pose> {
                None
            }
        }
        fn build_never(_: &EstimatorSpec) -> Result<Box<dyn PoseEstimator>> {
            Ok(Box::new(Never))
        }

        let mut registry = EstimatorRegistry::empty();
        registry.register("never", build_never);
        assert_eq!(registry.build(&EstimatorSpec::new("never")).unwrap().name(), "never");
    }
}
