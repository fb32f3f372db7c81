//! Type aliases for the filter's translational state.
//!
//! State order is `[p_e, p_n, p_u, v_e, v_n, v_u]` in local ENU metres.

use nalgebra::{SMatrix, SVector};

/// 6×6 covariance of `[p, v]`.
pub type Matrix6 = SMatrix<f64, 6, 6>;

/// Translational state `[p, v]`.
pub type Vector6 = SVector<f64, 6>;

/// 6×3 gain for a position measurement.
pub type Matrix6x3 = SMatrix<f64, 6, 3>;

/// 3×6 position measurement matrix.
pub type Matrix3x6 = SMatrix<f64, 3, 6>;
