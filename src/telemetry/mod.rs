//! Telemetry and camera input feeds.
//!
//! Telemetry may arrive piecemeal (position before attitude, intrinsics once
//! at startup). [`TelemetryTracker`] keeps the latest value of every field
//! and produces a complete [`VehicleState`] once all are known.

pub mod fov;

use image::GrayImage;
use nalgebra::{Matrix3, UnitQuaternion};

use crate::geometry::frames::{camera_attitude, off_nadir_angle, rotation_body_downward_cam};
use crate::geometry::{CameraIntrinsics, GeoPoint, GeoPosition};

/// One telemetry update. Absent fields keep their previous value.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    /// Local clock (seconds).
    pub timestamp: f64,
    pub position: Option<GeoPosition>,
    /// Vehicle attitude `R_ned_body`.
    pub vehicle_attitude: Option<UnitQuaternion<f64>>,
    /// Gimbal camera attitude `R_ned_cam`. Derived from the vehicle
    /// attitude and the fixed mount when absent.
    pub camera_attitude: Option<UnitQuaternion<f64>>,
    pub camera: Option<CameraIntrinsics>,
    /// Reading of the external reference clock at `timestamp` (seconds).
    pub reference_time: Option<f64>,
}

/// Timestamped greyscale camera frame.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub image: GrayImage,
    pub intrinsics: CameraIntrinsics,
    /// Local clock (seconds).
    pub timestamp: f64,
}

/// Complete vehicle state snapshot.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub timestamp: f64,
    pub position: GeoPosition,
    /// `R_ned_body`.
    pub vehicle_attitude: UnitQuaternion<f64>,
    /// `R_ned_cam`.
    pub camera_attitude: UnitQuaternion<f64>,
    pub camera: CameraIntrinsics,
    /// Camera field of view projected onto the ground. `None` when a corner
    /// ray misses the ground.
    pub fov: Option<Vec<GeoPoint>>,
}

impl VehicleState {
    /// Angle between the optical axis and nadir, degrees.
    pub fn off_nadir_deg(&self) -> f64 {
        off_nadir_angle(&self.camera_attitude).to_degrees()
    }
}

/// Accumulates partial telemetry into complete vehicle states.
pub struct TelemetryTracker {
    camera_mount: Matrix3<f64>,
    timestamp: f64,
    position: Option<GeoPosition>,
    vehicle_attitude: Option<UnitQuaternion<f64>>,
    gimbal_attitude: Option<UnitQuaternion<f64>>,
    camera: Option<CameraIntrinsics>,
    state: Option<VehicleState>,
}

impl TelemetryTracker {
    /// Tracker for a camera fixed to the body with mount `R_body_cam`.
    pub fn new(camera_mount: Matrix3<f64>) -> Self {
        Self {
            camera_mount,
            timestamp: f64::NEG_INFINITY,
            position: None,
            vehicle_attitude: None,
            gimbal_attitude: None,
            camera: None,
            state: None,
        }
    }

    /// Apply an update and return the refreshed state if it is complete.
    ///
    /// Updates older than the newest one seen are ignored.
    pub fn update(&mut self, telemetry: &Telemetry) -> Option<&VehicleState> {
        if telemetry.timestamp < self.timestamp {
            tracing::debug!(
                "Ignoring out-of-order telemetry ({:.3} < {:.3})",
                telemetry.timestamp,
                self.timestamp
            );
            return self.state.as_ref();
        }
        self.timestamp = telemetry.timestamp;

        if let Some(p) = telemetry.position.filter(|p| p.point.is_valid()) {
            self.position = Some(p);
        }
        if let Some(a) = telemetry.vehicle_attitude {
            self.vehicle_attitude = Some(a);
        }
        if let Some(a) = telemetry.camera_attitude {
            self.gimbal_attitude = Some(a);
        }
        if let Some(c) = telemetry.camera.filter(|c| c.is_valid()) {
            self.camera = Some(c);
        }

        self.state = self.build_state();
        self.state.as_ref()
    }

    pub fn state(&self) -> Option<&VehicleState> {
        self.state.as_ref()
    }

    fn build_state(&self) -> Option<VehicleState> {
        let position = self.position?;
        let vehicle_attitude = self.vehicle_attitude?;
        let camera = self.camera?;
        let camera_attitude = self
            .gimbal_attitude
            .unwrap_or_else(|| camera_attitude(&vehicle_attitude, &self.camera_mount));
        let fov = fov::project_fov(&position, &camera_attitude, &camera);

        Some(VehicleState {
            timestamp: self.timestamp,
            position,
            vehicle_attitude,
            camera_attitude,
            camera,
            fov,
        })
    }
}

impl Default for TelemetryTracker {
    fn default() -> Self {
        Self::new(rotation_body_downward_cam())
    }
}
