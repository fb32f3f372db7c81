//! Filter state, lifecycle phase and published snapshots.

use nalgebra::{UnitQuaternion, Vector3};

use super::types::{Matrix6, Vector6};

/// Lifecycle of the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterPhase {
    /// No accepted hypothesis yet, or diverged. Nothing is published.
    #[default]
    Uninitialized,
    /// Seeded (or reseeded) from a hypothesis with fresh covariance.
    Initialized,
    /// Predict/correct loop.
    Running,
}

/// Mean and covariance owned by the filter.
#[derive(Debug, Clone)]
pub struct FilterState {
    /// `[p, v]` in local ENU metres.
    pub mean: Vector6,
    pub covariance: Matrix6,
    /// Camera attitude `R_ned_cam`.
    pub attitude: UnitQuaternion<f64>,
    /// Per-axis attitude variance (rad²).
    pub attitude_variance: Vector3<f64>,
    /// Time the mean refers to (local clock).
    pub last_update: f64,
}

impl FilterState {
    pub fn position(&self) -> Vector3<f64> {
        self.mean.fixed_rows::<3>(0).into_owned()
    }

    pub fn velocity(&self) -> Vector3<f64> {
        self.mean.fixed_rows::<3>(3).into_owned()
    }

    pub fn position_std(&self) -> Vector3<f64> {
        Vector3::new(
            self.covariance[(0, 0)].sqrt(),
            self.covariance[(1, 1)].sqrt(),
            self.covariance[(2, 2)].sqrt(),
        )
    }

    pub fn velocity_std(&self) -> Vector3<f64> {
        Vector3::new(
            self.covariance[(3, 3)].sqrt(),
            self.covariance[(4, 4)].sqrt(),
            self.covariance[(5, 5)].sqrt(),
        )
    }

    pub fn attitude_std(&self) -> Vector3<f64> {
        self.attitude_variance.map(f64::sqrt)
    }

    pub fn snapshot(&self, phase: FilterPhase) -> FilterSnapshot {
        FilterSnapshot {
            timestamp: self.last_update,
            phase,
            position_enu: self.position(),
            velocity_enu: self.velocity(),
            attitude: self.attitude,
            position_std: self.position_std(),
            velocity_std: self.velocity_std(),
            attitude_std: self.attitude_std(),
        }
    }
}

/// Immutable copy of the filter output at one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSnapshot {
    pub timestamp: f64,
    pub phase: FilterPhase,
    pub position_enu: Vector3<f64>,
    pub velocity_enu: Vector3<f64>,
    /// `R_ned_cam`.
    pub attitude: UnitQuaternion<f64>,
    /// ENU standard deviations (m).
    pub position_std: Vector3<f64>,
    pub velocity_std: Vector3<f64>,
    /// Standard deviation per rotation-vector axis (rad).
    pub attitude_std: Vector3<f64>,
}

/// A pose hypothesis expressed in the filter's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseMeasurement {
    /// Time the hypothesis refers to (query frame time, local clock).
    pub timestamp: f64,
    pub position_enu: Vector3<f64>,
    /// `R_ned_cam`.
    pub attitude: UnitQuaternion<f64>,
}
