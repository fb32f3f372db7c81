//! Pinhole camera intrinsics.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics of an undistorted (rectified) image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

impl CameraIntrinsics {
    /// Intrinsics from a horizontal field of view, principal point at the
    /// image centre and square pixels.
    pub fn from_hfov(hfov_rad: f64, width: u32, height: u32) -> Self {
        let f = width as f64 / (2.0 * (hfov_rad / 2.0).tan());
        Self {
            fx: f,
            fy: f,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
            width,
            height,
        }
    }

    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn k_inv(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Horizontal field of view in radians.
    pub fn hfov(&self) -> f64 {
        2.0 * (self.width as f64 / (2.0 * self.fx)).atan()
    }

    /// Project a camera-frame point. `None` if it is behind the camera.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= 1e-9 {
            return None;
        }
        Some(Point2::new(
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }

    /// Viewing ray through a pixel, in camera coordinates with `z = 1`.
    pub fn ray(&self, pixel: &Point2<f64>) -> Vector3<f64> {
        Vector3::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy, 1.0)
    }

    /// The four image corners, clockwise from top-left.
    pub fn corners(&self) -> [Point2<f64>; 4] {
        let w = self.width as f64;
        let h = self.height as f64;
        [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ]
    }

    pub fn is_valid(&self) -> bool {
        self.fx > 0.0
            && self.fy > 0.0
            && self.width > 0
            && self.height > 0
            && [self.fx, self.fy, self.cx, self.cy].iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hfov_roundtrip() {
        let cam = CameraIntrinsics::from_hfov(1.0, 640, 480);
        assert_relative_eq!(cam.hfov(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(cam.k() * cam.k_inv(), Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_project_ray_roundtrip() {
        let cam = CameraIntrinsics::from_hfov(1.2, 320, 240);
        let px = Point2::new(17.0, 201.0);
        let p = cam.ray(&px) * 35.0;

        assert_relative_eq!(cam.project(&p).unwrap(), px, epsilon = 1e-9);
        assert!(cam.project(&(-p)).is_none());
    }
}
