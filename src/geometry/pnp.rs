//! Planar PnP: camera pose from correspondences with points on the `z = 0`
//! plane of the reference frame.
//!
//! The reference raster is a planar scene, so the projection of a ground
//! point `(X, Y, 0)` reduces to a homography:
//!
//! ```text
//! s · q = K [r1 r2 t] [X Y 1]ᵀ
//! ```
//!
//! The homography is estimated robustly and then decomposed against `K`.

use nalgebra::{Matrix3, Point2, Vector3};

use super::camera::CameraIntrinsics;
use super::homography::{find_homography_ransac, HomographyRansacConfig};
use super::Pose;

/// Result of planar PnP solving.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Estimated camera pose (`T_cam_ref`).
    pub pose: Pose,
    /// Inlier mask per correspondence.
    pub inlier_mask: Vec<bool>,
    /// Reprojection error per correspondence (in pixels).
    pub reproj_errors: Vec<f64>,
}

impl PnPResult {
    pub fn num_inliers(&self) -> usize {
        self.inlier_mask.iter().filter(|&&m| m).count()
    }
}

/// Solve planar PnP with RANSAC.
///
/// # Arguments
/// * `reference_pts` - Ground points as reference pixels (`z = 0` implied)
/// * `query_pts` - Corresponding query image points
/// * `camera` - Query camera intrinsics
/// * `config` - RANSAC settings (threshold is in query pixels)
pub fn solve_planar_pnp_ransac(
    reference_pts: &[Point2<f64>],
    query_pts: &[Point2<f64>],
    camera: &CameraIntrinsics,
    config: &HomographyRansacConfig,
) -> Option<PnPResult> {
    let homography = find_homography_ransac(reference_pts, query_pts, config)?;

    let inlier_refs: Vec<_> = reference_pts
        .iter()
        .zip(homography.inlier_mask.iter())
        .filter(|(_, &m)| m)
        .map(|(p, _)| *p)
        .collect();
    let pose = decompose_planar_homography(&homography.homography, camera, &inlier_refs)?;

    let reproj_errors: Vec<f64> = reference_pts
        .iter()
        .zip(query_pts.iter())
        .map(|(r, q)| reprojection_error(&pose, camera, r, q))
        .collect();
    let inlier_mask: Vec<bool> = reproj_errors
        .iter()
        .map(|&e| e < config.reprojection_threshold_px)
        .collect();

    let result = PnPResult {
        pose,
        inlier_mask,
        reproj_errors,
    };
    (result.num_inliers() >= config.min_inliers).then_some(result)
}

/// Recover `T_cam_ref` from a reference→image homography of the `z = 0` plane.
///
/// `support` are reference points known to be visible; the sign of the
/// decomposition is chosen so that they lie in front of the camera.
pub fn decompose_planar_homography(
    h: &Matrix3<f64>,
    camera: &CameraIntrinsics,
    support: &[Point2<f64>],
) -> Option<Pose> {
    let m = camera.k_inv() * h;
    let m1: Vector3<f64> = m.column(0).into_owned();
    let m2: Vector3<f64> = m.column(1).into_owned();
    let m3: Vector3<f64> = m.column(2).into_owned();

    let norm_sum = m1.norm() + m2.norm();
    if norm_sum < 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / norm_sum;

    // Pick the sign that puts the visible ground in front of the camera.
    let centroid = if support.is_empty() {
        Point2::origin()
    } else {
        let n = support.len() as f64;
        Point2::new(
            support.iter().map(|p| p.x).sum::<f64>() / n,
            support.iter().map(|p| p.y).sum::<f64>() / n,
        )
    };
    let depth = lambda * (m1.z * centroid.x + m2.z * centroid.y + m3.z);
    if depth < 0.0 {
        lambda = -lambda;
    }

    let r1 = m1 * lambda;
    let r2 = m2 * lambda;
    let r3 = r1.cross(&r2);
    let t = m3 * lambda;

    let rotation = Matrix3::from_columns(&[r1, r2, r3]);
    Pose::from_rt(rotation, t)
}

/// Homography `K [r1 r2 t]` mapping reference ground points to image pixels.
pub fn plane_homography(pose: &Pose, camera: &CameraIntrinsics) -> Matrix3<f64> {
    let r = pose.rotation_matrix();
    camera.k() * Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), pose.translation])
}

/// Pixel distance between the projection of a ground point and its match.
pub fn reprojection_error(
    pose: &Pose,
    camera: &CameraIntrinsics,
    reference: &Point2<f64>,
    query: &Point2<f64>,
) -> f64 {
    let p_cam = pose.transform_point(&Vector3::new(reference.x, reference.y, 0.0));
    match camera.project(&p_cam) {
        Some(px) => (px - query).norm(),
        None => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics::from_hfov(1.0, 640, 480)
    }

    fn true_pose() -> Pose {
        let rotation = UnitQuaternion::from_euler_angles(0.05, -0.08, 0.6);
        Pose::from_camera_center(rotation, &Vector3::new(260.0, 240.0, -500.0))
    }

    fn ground_points() -> Vec<Point2<f64>> {
        let mut pts = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                pts.push(Point2::new(120.0 + 30.0 * i as f64, 100.0 + 28.0 * j as f64));
            }
        }
        pts
    }

    fn project_all(pose: &Pose, cam: &CameraIntrinsics, pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
        pts.iter()
            .map(|p| cam.project(&pose.transform_point(&Vector3::new(p.x, p.y, 0.0))).unwrap())
            .collect()
    }

    #[test]
    fn test_planar_pnp_recovers_pose() {
        let cam = camera();
        let pose = true_pose();
        let refs = ground_points();
        let query = project_all(&pose, &cam, &refs);

        let result = solve_planar_pnp_ransac(&refs, &query, &cam, &HomographyRansacConfig::default()).unwrap();

        assert_eq!(result.num_inliers(), refs.len());
        assert!(result.pose.is_orthonormal(1e-9));
        assert_relative_eq!(result.pose.camera_center(), pose.camera_center(), epsilon = 1e-4);
        assert_relative_eq!(result.pose.rotation.angle_to(&pose.rotation), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_planar_pnp_rejects_outliers() {
        let cam = camera();
        let pose = true_pose();
        let refs = ground_points();
        let mut query = project_all(&pose, &cam, &refs);
        for q in query.iter_mut().step_by(7) {
            q.x += 35.0;
        }

        let result = solve_planar_pnp_ransac(&refs, &query, &cam, &HomographyRansacConfig::default()).unwrap();

        for (i, inlier) in result.inlier_mask.iter().enumerate() {
            assert_eq!(*inlier, i % 7 != 0, "correspondence {}", i);
        }
        assert_relative_eq!(result.pose.camera_center(), pose.camera_center(), epsilon = 1e-4);
    }

    #[test]
    fn test_plane_homography_matches_projection() {
        let cam = camera();
        let pose = true_pose();
        let h = plane_homography(&pose, &cam);
        let refs = ground_points();
        let query = project_all(&pose, &cam, &refs);

        for (r, q) in refs.iter().zip(query.iter()) {
            let v = h * r.to_homogeneous();
            assert_relative_eq!(Point2::new(v.x / v.z, v.y / v.z), *q, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_decomposition_sign_keeps_ground_in_front() {
        let cam = camera();
        let pose = true_pose();
        let h = plane_homography(&pose, &cam);

        // A negated homography describes the same mapping.
        let refs = ground_points();
        let decomposed = decompose_planar_homography(&(-h), &cam, &refs).unwrap();

        assert_relative_eq!(decomposed.camera_center(), pose.camera_center(), epsilon = 1e-6);
    }
}
