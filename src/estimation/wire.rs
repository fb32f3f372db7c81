//! Worker wire protocol.
//!
//! Messages between the control process and an estimation worker process
//! travel over the worker's stdin/stdout as length-prefixed postcard frames:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ Postcard binary          │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! Only plain values cross the boundary: the estimator is rebuilt in the
//! worker from its [`EstimatorSpec`], and images travel as raw pixels.
//!
//! Session: `Init(spec)` → `Ready | Failed`, then any number of
//! `Estimate(task)` → `Estimate { task_id, pose }`, then `Shutdown` or EOF.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use image::GrayImage;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::estimator::ImagePair;
use super::registry::EstimatorSpec;
use super::worker::EstimationTask;
use crate::error::{NavError, Result};
use crate::geometry::{CameraIntrinsics, Pose};
use crate::map::{GeoBBox, GeoRaster};
use crate::telemetry::CameraFrame;

/// Maximum frame payload (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Control process → worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerRequest {
    Init(EstimatorSpec),
    Estimate(WireTask),
    Shutdown,
}

/// Worker → control process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerResponse {
    Ready { backend: String },
    Failed { reason: String },
    Estimate { task_id: u64, pose: Option<WirePose> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl WireImage {
    pub fn from_image(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixels: image.as_raw().clone(),
        }
    }

    pub fn into_image(self) -> Result<GrayImage> {
        let (w, h) = (self.width, self.height);
        GrayImage::from_raw(w, h, self.pixels)
            .ok_or_else(|| NavError::Wire(format!("pixel buffer does not match {}x{}", w, h)))
    }
}

/// Pose as plain numbers: quaternion `[w, i, j, k]` and translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WirePose {
    pub rotation: [f64; 4],
    pub translation: [f64; 3],
}

impl From<&Pose> for WirePose {
    fn from(pose: &Pose) -> Self {
        let q = pose.rotation.quaternion();
        Self {
            rotation: [q.w, q.i, q.j, q.k],
            translation: [pose.translation.x, pose.translation.y, pose.translation.z],
        }
    }
}

impl WirePose {
    pub fn to_pose(&self) -> Pose {
        let [w, i, j, k] = self.rotation;
        Pose {
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(w, i, j, k)),
            translation: Vector3::from(self.translation),
        }
    }
}

/// An estimation task as plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTask {
    pub task_id: u64,
    pub query: WireImage,
    pub intrinsics: CameraIntrinsics,
    pub timestamp: f64,
    pub reference: WireImage,
    pub reference_bbox: GeoBBox,
    pub reference_timestamp: f64,
    pub prior: Option<WirePose>,
}

impl WireTask {
    pub fn from_task(task: &EstimationTask) -> Self {
        let pair = &task.pair;
        Self {
            task_id: task.id,
            query: WireImage::from_image(&pair.query.image),
            intrinsics: pair.query.intrinsics,
            timestamp: pair.query.timestamp,
            reference: WireImage::from_image(&pair.reference.image),
            reference_bbox: pair.reference.bbox,
            reference_timestamp: pair.reference.footprint.timestamp,
            prior: task.prior.as_ref().map(WirePose::from),
        }
    }

    pub fn into_task(self) -> Result<EstimationTask> {
        let reference = GeoRaster::new(self.reference.into_image()?, self.reference_bbox, self.reference_timestamp)
            .map_err(|e| NavError::Wire(e.to_string()))?;
        let query = CameraFrame {
            image: self.query.into_image()?,
            intrinsics: self.intrinsics,
            timestamp: self.timestamp,
        };
        Ok(EstimationTask {
            id: self.task_id,
            pair: ImagePair::new(query, Arc::new(reference)),
            prior: self.prior.map(|p| p.to_pose()),
        })
    }
}

/// Write one frame and flush.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let payload = postcard::to_allocvec(msg)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(NavError::Wire(format!("frame of {} bytes exceeds limit", payload.len())));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream before a frame
/// starts.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NavError::Wire(format!("frame of {} bytes exceeds limit", len)));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(postcard::from_bytes(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoPoint;
    use image::Luma;
    use std::io::Cursor;

    fn task() -> EstimationTask {
        let bbox = GeoBBox::around(&GeoPoint::new(47.0, 8.0), 100.0);
        let reference = GeoRaster::new(GrayImage::from_fn(64, 64, |x, y| Luma([(x ^ y) as u8])), bbox, 4.0).unwrap();
        let query = CameraFrame {
            image: GrayImage::from_fn(32, 24, |x, y| Luma([(x + 2 * y) as u8])),
            intrinsics: CameraIntrinsics::from_hfov(1.0, 32, 24),
            timestamp: 7.5,
        };
        EstimationTask {
            id: 42,
            pair: ImagePair::new(query, Arc::new(reference)),
            prior: Some(Pose::from_camera_center(
                UnitQuaternion::from_euler_angles(0.1, 0.0, 0.2),
                &Vector3::new(32.0, 30.0, -80.0),
            )),
        }
    }

    #[test]
    fn test_task_survives_wire() {
        let original = task();
        let mut buf = Vec::new();
        write_frame(&mut buf, &WorkerRequest::Estimate(WireTask::from_task(&original))).unwrap();

        let msg: WorkerRequest = read_frame(&mut Cursor::new(buf)).unwrap().unwrap();
        let WorkerRequest::Estimate(wire) = msg else {
            panic!("expected Estimate");
        };
        let decoded = wire.into_task().unwrap();

        assert_eq!(decoded.id, 42);
        assert_eq!(decoded.pair.query.image, original.pair.query.image);
        assert_eq!(decoded.pair.reference.image, original.pair.reference.image);
        assert_eq!(decoded.pair.reference.bbox, original.pair.reference.bbox);
        assert_eq!(decoded.pair.timestamp(), 7.5);
        let (a, b) = (decoded.prior.unwrap(), original.prior.unwrap());
        assert!(a.rotation.angle_to(&b.rotation) < 1e-12);
        assert_eq!(a.translation, b.translation);
    }

    #[test]
    fn test_frame_sequence_and_eof() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &WorkerResponse::Ready { backend: "x".into() }).unwrap();
        write_frame(&mut buf, &WorkerResponse::Estimate { task_id: 1, pose: None }).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: Option<WorkerResponse> = read_frame(&mut cursor).unwrap();
        let second: Option<WorkerResponse> = read_frame(&mut cursor).unwrap();
        let end: Option<WorkerResponse> = read_frame(&mut cursor).unwrap();

        assert_eq!(first, Some(WorkerResponse::Ready { backend: "x".into() }));
        assert_eq!(second, Some(WorkerResponse::Estimate { task_id: 1, pose: None }));
        assert_eq!(end, None);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 16]);
        let result: Result<Option<WorkerResponse>> = read_frame(&mut Cursor::new(buf));
        assert!(matches!(result, Err(NavError::Wire(_))));
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &WorkerResponse::Failed { reason: "boom".into() }).unwrap();
        buf.truncate(buf.len() - 2);
        let result: Result<Option<WorkerResponse>> = read_frame(&mut Cursor::new(buf));
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_pixel_buffer() {
        let img = WireImage {
            width: 4,
            height: 4,
            pixels: vec![0; 3],
        };
        assert!(img.into_image().is_err());
    }
}
