//! Prior-guided correlation estimator.
//!
//! Keeps the prior attitude and altitude and searches horizontal offsets of
//! the camera centre, scoring each candidate by the normalised
//! cross-correlation between the query image and the reference pixels it
//! would see. The search runs coarse to fine around the best candidate.

use nalgebra::{Point2, Vector3};

use super::estimator::{ImagePair, PoseEstimator, PoseValidity};
use crate::geometry::homography::project;
use crate::geometry::pnp::plane_homography;
use crate::geometry::Pose;

#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Half-size of the search window around the prior (reference pixels).
    pub search_radius_px: f64,
    /// Initial grid step (reference pixels); halved each refinement level.
    pub step_px: f64,
    /// Number of halvings after the coarse pass.
    pub refinement_levels: u32,
    /// Minimum NCC of the best candidate.
    pub min_score: f64,
    /// Spacing of query sample pixels.
    pub sample_stride_px: u32,
    pub validity: PoseValidity,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            search_radius_px: 24.0,
            step_px: 4.0,
            refinement_levels: 3,
            min_score: 0.5,
            sample_stride_px: 6,
            validity: PoseValidity::default(),
        }
    }
}

pub struct CorrelationEstimator {
    config: CorrelationConfig,
}

impl CorrelationEstimator {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    /// NCC between query samples and the reference as seen from `pose`.
    /// `None` if too few samples land inside the reference.
    fn score(&self, pair: &ImagePair, pose: &Pose) -> Option<f64> {
        let h = plane_homography(pose, &pair.query.intrinsics).try_inverse()?;
        let stride = self.config.sample_stride_px.max(1) as usize;
        let image = &pair.query.image;

        let (mut n, mut sq, mut sr, mut sqq, mut srr, mut sqr) = (0.0f64, 0.0, 0.0, 0.0, 0.0, 0.0);
        for y in (0..image.height()).step_by(stride) {
            for x in (0..image.width()).step_by(stride) {
                let q_px = Point2::new(x as f64 + 0.5, y as f64 + 0.5);
                let Some(r_px) = project(&h, &q_px) else {
                    continue;
                };
                let Some(r) = pair.reference.sample(&r_px) else {
                    continue;
                };
                let q = image.get_pixel(x, y).0[0] as f64;
                n += 1.0;
                sq += q;
                sr += r;
                sqq += q * q;
                srr += r * r;
                sqr += q * r;
            }
        }
        if n < 16.0 {
            return None;
        }
        let cov = sqr - sq * sr / n;
        let var_q = sqq - sq * sq / n;
        let var_r = srr - sr * sr / n;
        if var_q <= 1e-9 || var_r <= 1e-9 {
            return None;
        }
        Some(cov / (var_q * var_r).sqrt())
    }
}

impl Default for CorrelationEstimator {
    fn default() -> Self {
        Self::new(CorrelationConfig::default())
    }
}

impl PoseEstimator for CorrelationEstimator {
    fn name(&self) -> &str {
        "correlation"
    }

    fn estimate(&mut self, pair: &ImagePair, prior: Option<&Pose>) -> Option<Pose> {
        let prior = prior?;
        if !pair.query.intrinsics.is_valid() {
            return None;
        }
        let prior_center = prior.camera_center();
        let candidate = |offset: &Vector3<f64>| Pose::from_camera_center(prior.rotation, &(prior_center + offset));

        let mut best_offset = Vector3::zeros();
        let mut best_score = f64::NEG_INFINITY;
        let mut step = self.config.step_px.max(0.25);
        let mut radius = self.config.search_radius_px.max(step);

        for _ in 0..=self.config.refinement_levels {
            let steps = (radius / step).round() as i64;
            let center = best_offset;
            for iy in -steps..=steps {
                for ix in -steps..=steps {
                    let offset = center + Vector3::new(ix as f64 * step, iy as f64 * step, 0.0);
                    if let Some(score) = self.score(pair, &candidate(&offset)) {
                        if score > best_score {
                            best_score = score;
                            best_offset = offset;
                        }
                    }
                }
            }
            radius = step;
            step *= 0.5;
        }

        if best_score < self.config.min_score {
            tracing::debug!("correlation: best score {:.3} below {:.3}", best_score, self.config.min_score);
            return None;
        }
        let pose = candidate(&best_offset);
        self.config.validity.accepts(&pose, Some(prior)).then_some(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CameraIntrinsics, GeoPoint};
    use crate::map::{GeoBBox, GeoRaster};
    use crate::telemetry::CameraFrame;
    use image::{GrayImage, Luma};
    use nalgebra::UnitQuaternion;
    use std::sync::Arc;

    fn texture(x: f64, y: f64) -> f64 {
        let s = (x * 0.11).sin() * (y * 0.07).cos() + 0.5 * (x * 0.031 + y * 0.047).sin() + 0.3 * ((x - y) * 0.19).cos();
        127.0 + 60.0 * s
    }

    /// Render the reference ground through `pose` into a query frame.
    fn scene(pose: &Pose) -> ImagePair {
        let reference = GrayImage::from_fn(400, 400, |x, y| {
            Luma([texture(x as f64 + 0.5, y as f64 + 0.5).round() as u8])
        });
        let bbox = GeoBBox::around(&GeoPoint::new(47.0, 8.0), 200.0);
        let raster = Arc::new(GeoRaster::new(reference, bbox, 0.0).unwrap());

        let camera = CameraIntrinsics::from_hfov(1.0, 160, 120);
        let h_inv = plane_homography(pose, &camera).try_inverse().unwrap();
        let query = GrayImage::from_fn(160, 120, |x, y| {
            let r = project(&h_inv, &Point2::new(x as f64 + 0.5, y as f64 + 0.5)).unwrap();
            Luma([texture(r.x, r.y).round() as u8])
        });
        ImagePair::new(
            CameraFrame {
                image: query,
                intrinsics: camera,
                timestamp: 0.0,
            },
            raster,
        )
    }

    #[test]
    fn test_recovers_offset_from_prior() {
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3);
        let truth = Pose::from_camera_center(rotation, &Vector3::new(200.0, 190.0, -150.0));
        let prior = Pose::from_camera_center(rotation, &Vector3::new(211.0, 183.0, -150.0));

        let pair = scene(&truth);
        let mut est = CorrelationEstimator::default();
        let pose = est.estimate(&pair, Some(&prior)).unwrap();

        let err = (pose.camera_center() - truth.camera_center()).norm();
        assert!(err < 1.0, "centre error {}", err);
        assert_eq!(pose.rotation, prior.rotation);
    }

    #[test]
    fn test_requires_prior() {
        let truth = Pose::from_camera_center(UnitQuaternion::identity(), &Vector3::new(200.0, 200.0, -150.0));
        let mut est = CorrelationEstimator::default();
        assert!(est.estimate(&scene(&truth), None).is_none());
    }

    #[test]
    fn test_deterministic() {
        let truth = Pose::from_camera_center(UnitQuaternion::identity(), &Vector3::new(190.0, 205.0, -150.0));
        let prior = Pose::from_camera_center(UnitQuaternion::identity(), &Vector3::new(185.0, 210.0, -150.0));
        let pair = scene(&truth);

        let a = CorrelationEstimator::default().estimate(&pair, Some(&prior));
        let b = CorrelationEstimator::default().estimate(&pair, Some(&prior));
        assert_eq!(a, b);
    }

    #[test]
    fn test_flat_query_is_none() {
        let truth = Pose::from_camera_center(UnitQuaternion::identity(), &Vector3::new(200.0, 200.0, -150.0));
        let mut pair = scene(&truth);
        pair.query.image = GrayImage::from_pixel(160, 120, Luma([90]));

        assert!(CorrelationEstimator::default().estimate(&pair, Some(&truth)).is_none());
    }
}
