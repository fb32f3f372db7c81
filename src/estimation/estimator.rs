//! Pose estimator abstraction.
//!
//! A [`PoseEstimator`] turns an [`ImagePair`] (live camera frame plus
//! reference raster) and an optional prior into a camera pose in the
//! reference frame. "No usable match" is `None`, never an error or panic.
//!
//! [`KeypointPoseEstimator`] is the keypoint-based shape: a pluggable
//! [`KeypointMatcher`] finds correspondences, then a shared planar PnP step
//! recovers the pose.

use std::sync::Arc;

use image::GrayImage;
use nalgebra::{Matrix3, Point2};
use tracing::debug;

use super::matching::{Correspondences, PatchMatcher};
use crate::geometry::homography::{project, HomographyRansacConfig};
use crate::geometry::pnp::{plane_homography, solve_planar_pnp_ransac};
use crate::geometry::so3::angular_distance;
use crate::geometry::Pose;
use crate::map::raster::sample_bilinear;
use crate::map::GeoRaster;
use crate::telemetry::CameraFrame;

/// Query frame and the reference raster it is matched against.
#[derive(Debug, Clone)]
pub struct ImagePair {
    pub query: CameraFrame,
    pub reference: Arc<GeoRaster>,
}

impl ImagePair {
    pub fn new(query: CameraFrame, reference: Arc<GeoRaster>) -> Self {
        Self { query, reference }
    }

    pub fn timestamp(&self) -> f64 {
        self.query.timestamp
    }
}

/// Capability `estimate(pair, prior) -> pose-or-none`.
///
/// Implementations must be deterministic for identical inputs and state.
pub trait PoseEstimator: Send {
    /// Backend identifier.
    fn name(&self) -> &str;

    fn estimate(&mut self, pair: &ImagePair, prior: Option<&Pose>) -> Option<Pose>;
}

/// Image-to-image correspondence search.
pub trait KeypointMatcher: Send {
    /// Matches between `query` and `reference` pixel positions.
    /// `reference_valid` masks reference pixels that carry no data.
    fn find_matches(
        &mut self,
        query: &GrayImage,
        reference: &GrayImage,
        reference_valid: Option<&[bool]>,
    ) -> Option<Correspondences>;
}

impl KeypointMatcher for PatchMatcher {
    fn find_matches(
        &mut self,
        query: &GrayImage,
        reference: &GrayImage,
        reference_valid: Option<&[bool]>,
    ) -> Option<Correspondences> {
        let fq = self.detect(query, None);
        let fr = self.detect(reference, reference_valid);
        let matches = self.match_features(&fq, &fr);
        if matches.is_empty() {
            return None;
        }
        let mut out = Correspondences::default();
        for (qi, ri) in matches {
            out.push(fq.keypoints[qi].point(), fr.keypoints[ri].point());
        }
        Some(out)
    }
}

/// Acceptance checks shared by all backends.
#[derive(Debug, Clone)]
pub struct PoseValidity {
    /// Maximum rotation between estimate and prior (degrees).
    pub max_attitude_deviation_deg: f64,
    /// Orthonormality tolerance of the rotation.
    pub orthonormal_tolerance: f64,
}

impl Default for PoseValidity {
    fn default() -> Self {
        Self {
            max_attitude_deviation_deg: 15.0,
            orthonormal_tolerance: 1e-6,
        }
    }
}

impl PoseValidity {
    /// `true` if the pose is usable: finite, orthonormal, camera above the
    /// ground plane and close enough in attitude to the prior.
    pub fn accepts(&self, pose: &Pose, prior: Option<&Pose>) -> bool {
        let center = pose.camera_center();
        if !center.iter().all(|v| v.is_finite()) || !pose.is_orthonormal(self.orthonormal_tolerance) {
            return false;
        }
        // Reference z points down; the camera must be above ground.
        if center.z >= 0.0 {
            debug!("Rejecting pose with camera at or below ground (z = {:.1})", center.z);
            return false;
        }
        if let Some(prior) = prior {
            let deviation = angular_distance(&pose.rotation, &prior.rotation).to_degrees();
            if deviation > self.max_attitude_deviation_deg {
                debug!(
                    "Rejecting pose deviating {:.1}° from prior attitude (max {:.1}°)",
                    deviation, self.max_attitude_deviation_deg
                );
                return false;
            }
        }
        true
    }
}

/// Configuration of the shared geometric recovery step.
#[derive(Debug, Clone)]
pub struct KeypointEstimatorConfig {
    /// Minimum correspondences before attempting a fit (at least 4).
    pub min_matches: usize,
    pub ransac: HomographyRansacConfig,
    pub validity: PoseValidity,
    /// Warp the reference into the prior's view before matching.
    pub rectify_with_prior: bool,
}

impl Default for KeypointEstimatorConfig {
    fn default() -> Self {
        Self {
            min_matches: 15,
            ransac: HomographyRansacConfig::default(),
            validity: PoseValidity::default(),
            rectify_with_prior: true,
        }
    }
}

/// Keypoint-based estimator: matcher plus planar PnP.
pub struct KeypointPoseEstimator<M: KeypointMatcher> {
    name: String,
    matcher: M,
    config: KeypointEstimatorConfig,
}

impl<M: KeypointMatcher> KeypointPoseEstimator<M> {
    pub fn new(name: impl Into<String>, matcher: M, mut config: KeypointEstimatorConfig) -> Self {
        config.min_matches = config.min_matches.max(4);
        config.ransac.min_inliers = config.ransac.min_inliers.max(config.min_matches);
        Self {
            name: name.into(),
            matcher,
            config,
        }
    }

    pub fn min_matches(&self) -> usize {
        self.config.min_matches
    }

    /// Correspondences `(query px, reference px)` for a pair.
    ///
    /// With a prior and rectification enabled the reference is first warped
    /// into the expected camera view, so the matcher sees images of similar
    /// scale and orientation; matched points are mapped back to reference
    /// pixels.
    pub fn find_matching_keypoints(&mut self, pair: &ImagePair, prior: Option<&Pose>) -> Option<Correspondences> {
        let reference = &pair.reference.image;
        let query = &pair.query.image;

        let query_to_ref = prior
            .filter(|_| self.config.rectify_with_prior)
            .and_then(|p| plane_homography(p, &pair.query.intrinsics).try_inverse());

        match query_to_ref {
            Some(query_to_ref) => {
                let (warped, valid) = warp_reference(reference, &query_to_ref, query.width(), query.height());
                let matches = self.matcher.find_matches(query, &warped, Some(&valid))?;
                let mut out = Correspondences::default();
                for (q, w) in matches.query.iter().zip(matches.reference.iter()) {
                    if let Some(r) = project(&query_to_ref, w) {
                        out.push(*q, r);
                    }
                }
                Some(out)
            }
            None => self.matcher.find_matches(query, reference, None),
        }
    }
}

impl<M: KeypointMatcher> PoseEstimator for KeypointPoseEstimator<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimate(&mut self, pair: &ImagePair, prior: Option<&Pose>) -> Option<Pose> {
        if !pair.query.intrinsics.is_valid() {
            return None;
        }
        let matches = self.find_matching_keypoints(pair, prior)?;
        if matches.len() < self.config.min_matches {
            debug!(
                "{}: {} matches, need {}",
                self.name,
                matches.len(),
                self.config.min_matches
            );
            return None;
        }

        let result = solve_planar_pnp_ransac(
            &matches.reference,
            &matches.query,
            &pair.query.intrinsics,
            &self.config.ransac,
        )?;
        debug!(
            "{}: {}/{} inliers",
            self.name,
            result.num_inliers(),
            matches.len()
        );

        let pose = result.pose.renormalized();
        self.config.validity.accepts(&pose, prior).then_some(pose)
    }
}

/// Render the reference as seen through `query_to_ref`, with a validity
/// mask for pixels that fall outside the reference.
pub fn warp_reference(
    reference: &GrayImage,
    query_to_ref: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> (GrayImage, Vec<bool>) {
    let mut valid = vec![false; (width * height) as usize];
    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let q = Point2::new(x as f64 + 0.5, y as f64 + 0.5);
            let Some(r) = project(query_to_ref, &q) else {
                continue;
            };
            if let Some(v) = sample_bilinear(reference, &r) {
                out.put_pixel(x, y, image::Luma([v.round().clamp(0.0, 255.0) as u8]));
                valid[(y * width + x) as usize] = true;
            }
        }
    }
    (out, valid)
}
