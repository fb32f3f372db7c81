//! Camera fix: an estimated pose expressed in geographic terms.

use nalgebra::{Point2, UnitQuaternion};

use crate::geometry::frames::attitude_from_pose;
use crate::geometry::{GeoPoint, Pose};
use crate::map::GeoRaster;

/// Geographic camera position and attitude recovered from a pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFix {
    /// Query frame timestamp (local clock).
    pub timestamp: f64,
    pub position: GeoPoint,
    /// Height above the reference ground plane (m).
    pub altitude_agl: f64,
    /// `altitude_agl` plus the terrain elevation (m).
    pub altitude_amsl: f64,
    /// Camera attitude `R_ned_cam`.
    pub attitude: UnitQuaternion<f64>,
}

impl CameraFix {
    /// Convert a `T_cam_ref` pose estimated against `raster`.
    ///
    /// `ground_elevation` is the terrain height (AMSL) the raster plane is
    /// assumed to lie at. `None` if the camera is not above the plane.
    pub fn from_pose(pose: &Pose, raster: &GeoRaster, ground_elevation: f64, timestamp: f64) -> Option<Self> {
        let center = pose.camera_center();
        // Reference z points down, in reference pixels.
        let altitude_agl = -center.z * raster.gsd();
        if !(altitude_agl > 0.0) || !altitude_agl.is_finite() {
            return None;
        }
        let position = raster.pixel_to_geo(&Point2::new(center.x, center.y));
        Some(Self {
            timestamp,
            position,
            altitude_agl,
            altitude_amsl: ground_elevation + altitude_agl,
            attitude: attitude_from_pose(pose),
        })
    }
}
