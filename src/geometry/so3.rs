//! SO(3) helpers: projection onto rotations and small-angle error vectors.
//!
//! Attitude corrections in the filter are expressed as rotation vectors
//! (axis × angle) and applied on the left:
//!
//! ```text
//! R_new = exp(δ) · R_old      δ = log(R_meas · R_oldᵀ)
//! ```

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Angles below this are treated as zero rotation.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-12;

/// Closest rotation matrix (Frobenius norm) to an arbitrary 3×3 matrix.
///
/// Uses the SVD `M = U Σ Vᵀ` and returns `U diag(1, 1, det(UVᵀ)) Vᵀ`, which
/// fixes reflections. Returns `None` if the decomposition fails or the matrix
/// is rank-deficient.
pub fn closest_rotation(m: &Matrix3<f64>) -> Option<Rotation3<f64>> {
    let svd = m.svd(true, true);
    if svd.singular_values.iter().any(|s| !s.is_finite()) || svd.singular_values.min() < 1e-12 {
        return None;
    }
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut d = Matrix3::identity();
    if (u * v_t).determinant() < 0.0 {
        d[(2, 2)] = -1.0;
    }
    Some(Rotation3::from_matrix_unchecked(u * d * v_t))
}

/// Rotation vector taking `from` to `to` when applied on the left.
pub fn rotation_error(from: &UnitQuaternion<f64>, to: &UnitQuaternion<f64>) -> Vector3<f64> {
    (to * from.inverse()).scaled_axis()
}

/// Apply a left-multiplied rotation-vector increment.
pub fn retract(rotation: &UnitQuaternion<f64>, delta: &Vector3<f64>) -> UnitQuaternion<f64> {
    if delta.norm() < SMALL_ANGLE_THRESHOLD {
        return *rotation;
    }
    let mut updated = UnitQuaternion::from_scaled_axis(*delta) * rotation;
    updated.renormalize();
    updated
}

/// Angle in radians between two orientations.
pub fn angular_distance(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    a.angle_to(b)
}
