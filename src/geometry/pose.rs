//! Rigid-body pose of the camera relative to the reference raster.

use std::ops::Mul;

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use super::so3::closest_rotation;

/// Rigid transform `T_cw`: maps reference-world points into the camera frame.
///
/// The reference world is the pixel grid of the reference raster lifted to 3D
/// (x east, y south, z down; unit = one reference pixel). The camera frame is
/// the usual computer-vision one (x right, y down, z forward).
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build a pose from a raw rotation matrix and translation.
    ///
    /// The matrix is projected onto SO(3) first, so slightly non-orthonormal
    /// input (e.g. from a homography decomposition) is fine. Returns `None`
    /// for degenerate or non-finite input.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Option<Self> {
        if !rotation.iter().all(|v| v.is_finite()) || !translation.iter().all(|v| v.is_finite()) {
            return None;
        }
        let rotation = closest_rotation(&rotation)?;
        Some(Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rotation),
            translation,
        })
    }

    /// Pose of a camera with the given orientation (`R_cw`) located at
    /// `center` in reference-world coordinates.
    pub fn from_camera_center(rotation: UnitQuaternion<f64>, center: &Vector3<f64>) -> Self {
        let translation = -rotation.transform_vector(center);
        Self {
            rotation,
            translation,
        }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            translation: -rotation.transform_vector(&self.translation),
            rotation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transform_vector(p) + self.translation
    }

    /// Camera centre in reference-world coordinates, `C = -Rᵀ t`.
    pub fn camera_center(&self) -> Vector3<f64> {
        -self.rotation.inverse_transform_vector(&self.translation)
    }

    /// Rotation matrix orthonormality check (`RᵀR = I`, `det R = 1`).
    pub fn is_orthonormal(&self, tolerance: f64) -> bool {
        let r = self.rotation_matrix();
        let gram_err = (r.transpose() * r - Matrix3::identity()).abs().max();
        gram_err <= tolerance && (r.determinant() - 1.0).abs() <= tolerance
    }

    /// Same pose with the quaternion re-normalised.
    pub fn renormalized(&self) -> Self {
        let mut rotation = self.rotation;
        rotation.renormalize();
        Self {
            rotation,
            translation: self.translation,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul<&Pose> for &Pose {
    type Output = Pose;

    fn mul(self, rhs: &Pose) -> Pose {
        Pose {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation.transform_vector(&rhs.translation) + self.translation,
        }
    }
}
