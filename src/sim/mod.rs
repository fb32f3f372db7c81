//! Synthetic world for demos and end-to-end tests.
//!
//! A flat textured ground plane stands in for both the map server and the
//! camera: [`SyntheticMapService`] renders orthoimages of it and
//! [`SyntheticWorld::render_view`] renders what a camera at a given pose
//! sees. [`SimFlight`] produces telemetry for a straight, level flight.

mod texture;

pub use texture::GroundTexture;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{GrayImage, Luma};
use nalgebra::{Point2, UnitQuaternion, Vector3};

use crate::error::{NavError, Result};
use crate::geometry::{CameraIntrinsics, GeoPoint, GeoPosition, LocalTangentPlane};
use crate::map::{GeoRaster, MapRequest, MapService};
use crate::telemetry::{CameraFrame, Telemetry};

/// Flat textured ground at a fixed elevation.
#[derive(Debug, Clone)]
pub struct SyntheticWorld {
    plane: LocalTangentPlane,
    texture: GroundTexture,
}

impl SyntheticWorld {
    pub fn new(origin: GeoPoint, ground_elevation: f64, seed: u64) -> Self {
        Self {
            plane: LocalTangentPlane::new(origin, ground_elevation),
            texture: GroundTexture::new(seed),
        }
    }

    pub fn origin(&self) -> GeoPoint {
        self.plane.origin()
    }

    pub fn ground_elevation(&self) -> f64 {
        self.plane.origin_alt()
    }

    pub fn plane(&self) -> &LocalTangentPlane {
        &self.plane
    }

    pub fn intensity_at(&self, point: &GeoPoint) -> f64 {
        let enu = self.plane.to_enu(point, self.plane.origin_alt());
        self.texture.intensity(enu.x, enu.y)
    }

    /// North-up orthoimage covering the request.
    pub fn render_raster(&self, request: &MapRequest) -> Result<GeoRaster> {
        if request.width_px == 0 || request.height_px == 0 {
            return Err(NavError::MapFetch("empty raster requested".into()));
        }
        let bbox = request.bbox;
        let (w, h) = (request.width_px, request.height_px);
        let image = GrayImage::from_fn(w, h, |x, y| {
            let u = (x as f64 + 0.5) / w as f64;
            let v = (y as f64 + 0.5) / h as f64;
            let point = GeoPoint::new(
                bbox.max_lat - v * (bbox.max_lat - bbox.min_lat),
                bbox.min_lon + u * (bbox.max_lon - bbox.min_lon),
            );
            Luma([self.intensity_at(&point).round() as u8])
        });
        GeoRaster::new(image, request.bbox, request.timestamp)
    }

    /// Image seen by a camera at `position` with attitude `R_ned_cam`.
    /// Rays that miss the ground are black.
    pub fn render_view(
        &self,
        position: &GeoPosition,
        r_ned_cam: &UnitQuaternion<f64>,
        camera: &CameraIntrinsics,
        timestamp: f64,
    ) -> CameraFrame {
        let vehicle = self.plane.to_enu(&position.point, position.altitude_amsl);
        let height = vehicle.z;
        let image = GrayImage::from_fn(camera.width, camera.height, |x, y| {
            let ray = camera.ray(&Point2::new(x as f64 + 0.5, y as f64 + 0.5));
            let d: Vector3<f64> = r_ned_cam.transform_vector(&ray);
            if d.z <= 1e-6 || height <= 0.0 {
                return Luma([0]);
            }
            let s = height / d.z;
            let east = vehicle.x + s * d.y;
            let north = vehicle.y + s * d.x;
            Luma([self.texture.intensity(east, north).round() as u8])
        });
        CameraFrame {
            image,
            intrinsics: *camera,
            timestamp,
        }
    }
}

/// Map service backed by a [`SyntheticWorld`].
pub struct SyntheticMapService {
    world: Arc<SyntheticWorld>,
    latency: Duration,
    requests: AtomicU64,
}

impl SyntheticMapService {
    pub fn new(world: Arc<SyntheticWorld>) -> Self {
        Self {
            world,
            latency: Duration::ZERO,
            requests: AtomicU64::new(0),
        }
    }

    /// Simulated server latency per request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl MapService for SyntheticMapService {
    fn fetch(&self, request: &MapRequest) -> Result<GeoRaster> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.world.render_raster(request)
    }
}

/// Straight and level flight over a [`SyntheticWorld`].
#[derive(Clone)]
pub struct SimFlight {
    pub world: Arc<SyntheticWorld>,
    pub altitude_agl: f64,
    pub speed_mps: f64,
    /// Radians clockwise from north.
    pub heading_rad: f64,
    pub camera: CameraIntrinsics,
    /// Reference clock (Unix seconds) at local time zero.
    pub reference_epoch: f64,
}

impl SimFlight {
    pub fn new(world: Arc<SyntheticWorld>) -> Self {
        Self {
            world,
            altitude_agl: 120.0,
            speed_mps: 12.0,
            heading_rad: 0.6,
            camera: CameraIntrinsics::from_hfov(1.0, 320, 240),
            reference_epoch: 1_700_000_000.0,
        }
    }

    pub fn position_at(&self, t: f64) -> GeoPosition {
        let distance = self.speed_mps * t;
        let enu = Vector3::new(
            distance * self.heading_rad.sin(),
            distance * self.heading_rad.cos(),
            self.altitude_agl,
        );
        let (point, altitude_amsl) = self.world.plane().from_enu(&enu);
        GeoPosition {
            point,
            altitude_amsl,
            altitude_agl: self.altitude_agl,
        }
    }

    /// `R_ned_body`: level, nose along the heading.
    pub fn vehicle_attitude(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(0.0, 0.0, self.heading_rad)
    }

    pub fn telemetry_at(&self, t: f64) -> Telemetry {
        Telemetry {
            timestamp: t,
            position: Some(self.position_at(t)),
            vehicle_attitude: Some(self.vehicle_attitude()),
            camera_attitude: None,
            camera: Some(self.camera),
            reference_time: Some(self.reference_epoch + t),
        }
    }

    /// Camera frame at `t` seen with attitude `R_ned_cam`.
    pub fn frame_at(&self, t: f64, r_ned_cam: &UnitQuaternion<f64>) -> CameraFrame {
        self.world.render_view(&self.position_at(t), r_ned_cam, &self.camera, t)
    }
}
