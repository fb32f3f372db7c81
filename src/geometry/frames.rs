//! Coordinate frame definitions for map-matching navigation.
//!
//! # Frames
//!
//! ## Camera frame (RDF, computer-vision convention)
//! ```text
//!        +Y (down)
//!         |
//!         +------ +X (right)
//!        /
//!      +Z (forward, optical axis)
//! ```
//!
//! ## Reference frame (raster pixel grid lifted to 3D)
//! - X: East (raster column)
//! - Y: South (raster row)
//! - Z: Down (into the ground)
//!
//! Units are reference pixels, so a point on the ground is `(col, row, 0)`.
//! A north-up nadir camera has the identity rotation with respect to this
//! frame, which keeps planar pose recovery well conditioned.
//!
//! ## Local navigation frame (NED)
//! - X: North
//! - Y: East
//! - Z: Down
//!
//! Vehicle and camera attitudes arrive as `R_ned_body` / `R_ned_cam`. The
//! filter works in ENU metres, so [`ned_to_enu`] and [`enu_to_ned`] are
//! provided as well.
//!
//! ## Body frame (FRD)
//! - X: Forward
//! - Y: Right
//! - Z: Down
//!
//! # Naming
//!
//! `R_target_source` maps a vector from `source` coordinates into `target`
//! coordinates:
//! ```text
//! v_ned = R_ned_cam * v_cam
//! ```

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use super::Pose;

// ============================================================================
// Fixed rotations
// ============================================================================

/// Rotation from the reference (ESD) frame to NED.
///
/// - Reference +X (east)  → NED +Y
/// - Reference +Y (south) → NED -X
/// - Reference +Z (down)  → NED +Z
#[rustfmt::skip]
pub fn rotation_ned_reference() -> Matrix3<f64> {
    Matrix3::new(
        0.0, -1.0, 0.0,  // North = -South
        1.0,  0.0, 0.0,  // East
        0.0,  0.0, 1.0,  // Down
    )
}

/// Mount rotation `R_body_cam` of a downward-looking camera whose image top
/// points towards the vehicle nose.
///
/// - Camera +X (right) → Body +Y (right)
/// - Camera +Y (down)  → Body -X (aft)
/// - Camera +Z (optical axis) → Body +Z (down)
#[rustfmt::skip]
pub fn rotation_body_downward_cam() -> Matrix3<f64> {
    Matrix3::new(
        0.0, -1.0, 0.0,
        1.0,  0.0, 0.0,
        0.0,  0.0, 1.0,
    )
}

/// Rotation from NED to ENU (its own inverse).
#[rustfmt::skip]
fn rotation_enu_ned() -> Matrix3<f64> {
    Matrix3::new(
        0.0, 1.0,  0.0,
        1.0, 0.0,  0.0,
        0.0, 0.0, -1.0,
    )
}

fn quat(m: Matrix3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
}

// ============================================================================
// Vector conversions
// ============================================================================

pub fn ned_to_enu(v: &Vector3<f64>) -> Vector3<f64> {
    rotation_enu_ned() * v
}

pub fn enu_to_ned(v: &Vector3<f64>) -> Vector3<f64> {
    rotation_enu_ned() * v
}

// ============================================================================
// Attitudes
// ============================================================================

/// Camera attitude `R_ned_cam` from vehicle attitude `R_ned_body` and the
/// camera mount `R_body_cam`.
pub fn camera_attitude(
    vehicle_attitude: &UnitQuaternion<f64>,
    mount: &Matrix3<f64>,
) -> UnitQuaternion<f64> {
    vehicle_attitude * quat(*mount)
}

/// Attitude `R_ned_cam` of an exactly nadir-pointing camera whose image top
/// faces `heading_rad` (clockwise from north).
pub fn nadir_camera_attitude(heading_rad: f64) -> UnitQuaternion<f64> {
    let vehicle = UnitQuaternion::from_euler_angles(0.0, 0.0, heading_rad);
    camera_attitude(&vehicle, &rotation_body_downward_cam())
}

/// Angle between the optical axis and the local vertical, in radians.
pub fn off_nadir_angle(r_ned_cam: &UnitQuaternion<f64>) -> f64 {
    let axis = r_ned_cam.transform_vector(&Vector3::z());
    axis.z.clamp(-1.0, 1.0).acos()
}

/// Heading of the image top (`-Y` camera axis) projected on the horizontal
/// plane, radians clockwise from north in `[0, 2π)`.
pub fn image_heading(r_ned_cam: &UnitQuaternion<f64>) -> f64 {
    let up = r_ned_cam.transform_vector(&-Vector3::y());
    up.y.atan2(up.x).rem_euclid(std::f64::consts::TAU)
}

// ============================================================================
// Pose conversions
// ============================================================================

/// Camera pose `T_cam_ref` from a camera attitude in NED and a camera centre
/// in reference coordinates.
pub fn pose_from_attitude(r_ned_cam: &UnitQuaternion<f64>, center_ref: &Vector3<f64>) -> Pose {
    // R_cam_ref = R_ned_camᵀ · R_ned_ref
    let r_cam_ref = r_ned_cam.inverse() * quat(rotation_ned_reference());
    Pose::from_camera_center(r_cam_ref, center_ref)
}

/// Camera attitude `R_ned_cam` of an estimated pose.
pub fn attitude_from_pose(pose: &Pose) -> UnitQuaternion<f64> {
    // R_ned_cam = R_ned_ref · R_cam_refᵀ
    quat(rotation_ned_reference()) * pose.rotation.inverse()
}
