//! Ground projection of the camera field of view.
//!
//! Assumes flat terrain at the vehicle's altitude above ground.

use nalgebra::{Point2, UnitQuaternion, Vector3};

use crate::geometry::frames::ned_to_enu;
use crate::geometry::{CameraIntrinsics, GeoPoint, GeoPosition, LocalTangentPlane};

/// Rays this close to horizontal (NED z component) are treated as missing
/// the ground.
const MIN_RAY_DOWN: f64 = 1e-3;

/// Ground intersection of the viewing ray through `pixel`, as a NED offset
/// from the vehicle in metres.
pub fn ground_offset(
    altitude_agl: f64,
    r_ned_cam: &UnitQuaternion<f64>,
    camera: &CameraIntrinsics,
    pixel: &Point2<f64>,
) -> Option<Vector3<f64>> {
    if !(altitude_agl > 0.0) {
        return None;
    }
    let ray = r_ned_cam.transform_vector(&camera.ray(pixel));
    if ray.z <= MIN_RAY_DOWN * ray.norm() {
        return None;
    }
    Some(ray * (altitude_agl / ray.z))
}

/// Project the image corners onto the ground.
///
/// Returns `None` if any corner ray points at or above the horizon.
pub fn project_fov(
    position: &GeoPosition,
    r_ned_cam: &UnitQuaternion<f64>,
    camera: &CameraIntrinsics,
) -> Option<Vec<GeoPoint>> {
    let ltp = LocalTangentPlane::new(position.point, 0.0);
    camera
        .corners()
        .iter()
        .map(|corner| {
            let ned = ground_offset(position.altitude_agl, r_ned_cam, camera, corner)?;
            let mut enu = ned_to_enu(&ned);
            enu.z = 0.0;
            Some(ltp.from_enu(&enu).0)
        })
        .collect()
}

/// Ground point under the principal point.
pub fn project_principal_point(
    position: &GeoPosition,
    r_ned_cam: &UnitQuaternion<f64>,
    camera: &CameraIntrinsics,
) -> Option<GeoPoint> {
    let ned = ground_offset(
        position.altitude_agl,
        r_ned_cam,
        camera,
        &Point2::new(camera.cx, camera.cy),
    )?;
    let mut enu = ned_to_enu(&ned);
    enu.z = 0.0;
    Some(LocalTangentPlane::new(position.point, 0.0).from_enu(&enu).0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::frames::{camera_attitude, nadir_camera_attitude, rotation_body_downward_cam};
    use crate::geometry::polygon;
    use approx::assert_relative_eq;

    fn position() -> GeoPosition {
        GeoPosition {
            point: GeoPoint::new(47.0, 8.0),
            altitude_amsl: 600.0,
            altitude_agl: 100.0,
        }
    }

    #[test]
    fn test_nadir_fov_is_centered_rectangle() {
        let camera = CameraIntrinsics::from_hfov(std::f64::consts::FRAC_PI_2, 400, 300);
        let att = nadir_camera_attitude(0.0);
        let fov = project_fov(&position(), &att, &camera).unwrap();

        let ltp = LocalTangentPlane::new(position().point, 0.0);
        let pts: Vec<_> = fov
            .iter()
            .map(|p| {
                let v = ltp.to_enu(p, 0.0);
                Point2::new(v.x, v.y)
            })
            .collect();

        // 90° hfov at 100 m: 200 m wide, 150 m tall.
        assert_relative_eq!(polygon::area(&pts), 200.0 * 150.0, epsilon = 1.0);
        let c = polygon::centroid(&pts).unwrap();
        assert_relative_eq!(c.x, 0.0, epsilon = 1e-3);
        assert_relative_eq!(c.y, 0.0, epsilon = 1e-3);

        // Top-left image corner is north-west of the vehicle.
        assert!(pts[0].x < 0.0 && pts[0].y > 0.0);
    }

    #[test]
    fn test_horizon_returns_none() {
        let camera = CameraIntrinsics::from_hfov(1.0, 400, 300);
        let vehicle = UnitQuaternion::from_euler_angles(0.0, 1.4, 0.0);
        let att = camera_attitude(&vehicle, &rotation_body_downward_cam());

        assert!(project_fov(&position(), &att, &camera).is_none());
    }

    #[test]
    fn test_principal_point_offset_with_pitch() {
        let camera = CameraIntrinsics::from_hfov(1.0, 400, 300);
        let vehicle = UnitQuaternion::from_euler_angles(0.0, 0.1, 0.0);
        let att = camera_attitude(&vehicle, &rotation_body_downward_cam());

        let ltp = LocalTangentPlane::new(position().point, 0.0);
        let c = ltp.to_enu(&project_principal_point(&position(), &att, &camera).unwrap(), 0.0);

        // Nose-up pitch swings a belly camera forward.
        assert_relative_eq!(c.y, 100.0 * 0.1f64.tan(), epsilon = 1e-3);
        assert_relative_eq!(c.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_altitude_returns_none() {
        let camera = CameraIntrinsics::from_hfov(1.0, 400, 300);
        let mut pos = position();
        pos.altitude_agl = 0.0;
        assert!(project_fov(&pos, &nadir_camera_attitude(0.0), &camera).is_none());
    }
}
