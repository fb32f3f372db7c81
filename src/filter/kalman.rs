//! Constant-velocity Kalman filter with a multiplicative attitude filter.
//!
//! Translation: state `x = [p, v]` (ENU metres), white-noise acceleration.
//!
//! ```text
//! F = | I  dt·I |        Q = σa² · | dt⁴/4·I  dt³/2·I |
//!     | 0    I  |                  | dt³/2·I    dt²·I |
//! ```
//!
//! A hypothesis stamped `d = now - t_m` seconds ago measures the past
//! position `p - d·v`, so it is fused with `H = [I  -d·I]` and its noise is
//! inflated by the position block of `Q(d)` for the acceleration over the
//! delay.
//!
//! Attitude: mean rotation plus per-axis variance of a left rotation-vector
//! error, random-walk growth on predict and a scalar Kalman update per axis
//! on correct.

use nalgebra::{Matrix3, Vector3};
use tracing::{debug, info, warn};

use super::state::{FilterPhase, FilterSnapshot, FilterState, PoseMeasurement};
use super::types::{Matrix3x6, Matrix6, Matrix6x3, Vector6};
use crate::geometry::so3::{retract, rotation_error};
use crate::system::config::FilterConfig;

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// State after the tick; `None` while uninitialized or after divergence.
    pub snapshot: Option<FilterSnapshot>,
    /// Hypotheses fused this tick.
    pub accepted: usize,
    /// Hypotheses discarded as stale, too old or malformed.
    pub discarded: usize,
    /// The filter diverged this tick and was reset.
    pub diverged: bool,
}

/// Recursive pose filter driven by [`tick`](NavFilter::tick).
pub struct NavFilter {
    config: FilterConfig,
    phase: FilterPhase,
    state: Option<FilterState>,
    /// Timestamp of the newest accepted hypothesis.
    newest_accepted: f64,
}

impl NavFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            phase: FilterPhase::Uninitialized,
            state: None,
            newest_accepted: f64::NEG_INFINITY,
        }
    }

    pub fn phase(&self) -> FilterPhase {
        self.phase
    }

    pub fn state(&self) -> Option<&FilterState> {
        self.state.as_ref()
    }

    pub fn snapshot(&self) -> Option<FilterSnapshot> {
        self.state.as_ref().map(|s| s.snapshot(self.phase))
    }

    /// One filter tick at `now`: predict, then fuse every relevant
    /// hypothesis in timestamp order, then check divergence.
    pub fn tick(&mut self, now: f64, hypotheses: &[PoseMeasurement]) -> TickOutcome {
        if self.state.is_some() {
            self.predict(now);
            if self.phase == FilterPhase::Initialized {
                self.phase = FilterPhase::Running;
            }
        }

        let mut ordered = hypotheses.to_vec();
        ordered.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let (mut accepted, mut discarded) = (0, 0);
        for m in &ordered {
            if !self.is_relevant(m, now) {
                discarded += 1;
                continue;
            }
            self.newest_accepted = m.timestamp;
            accepted += 1;
            if self.state.is_some() {
                self.correct(m, now);
            } else {
                self.seed(m, now);
            }
        }

        let diverged = self.check_divergence();
        TickOutcome {
            snapshot: self.snapshot(),
            accepted,
            discarded,
            diverged,
        }
    }

    /// Discard accumulated covariance and restart from the current mean.
    /// Used when the estimator backend changes.
    pub fn reinitialize(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.covariance = initial_covariance(&self.config);
        state.attitude_variance = Vector3::repeat(self.config.attitude_measurement_std_rad.powi(2));
        self.phase = FilterPhase::Initialized;
        info!("Filter reinitialized");
    }

    /// Propagate mean and covariance to `now`. Covariance never shrinks.
    pub fn predict(&mut self, now: f64) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let dt = now - state.last_update;
        if dt <= 0.0 {
            return;
        }

        let f = transition(dt);
        let q = process_noise(dt, self.config.acceleration_noise);
        state.mean = f * state.mean;
        state.covariance = f * state.covariance * f.transpose() + q;
        state.covariance = symmetrize(&state.covariance);
        state.attitude_variance += Vector3::repeat(self.config.attitude_noise.powi(2) * dt);
        state.last_update = now;
    }

    /// Fuse a hypothesis as a measurement of the position it had at its own
    /// timestamp. Covariance never grows.
    fn correct(&mut self, m: &PoseMeasurement, now: f64) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let delay = (now - m.timestamp).max(0.0);
        let h = measurement_matrix(delay);
        let r = delayed_measurement_noise(&self.config, delay);

        let innovation = m.position_enu - h * state.mean;
        let s = h * state.covariance * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            warn!("Singular innovation covariance, skipping correction");
            return;
        };
        let k: Matrix6x3 = state.covariance * h.transpose() * s_inv;

        state.mean += k * innovation;
        // Joseph form keeps the covariance symmetric positive definite.
        let i_kh = Matrix6::identity() - k * h;
        state.covariance = symmetrize(&(i_kh * state.covariance * i_kh.transpose() + k * r * k.transpose()));

        let r_att = self.config.attitude_measurement_std_rad.powi(2);
        let delta = rotation_error(&state.attitude, &m.attitude);
        let gain = state.attitude_variance.map(|var| var / (var + r_att));
        state.attitude = retract(&state.attitude, &delta.component_mul(&gain));
        state.attitude_variance = state.attitude_variance.component_mul(&gain.map(|g| 1.0 - g));

        debug!(
            "Fused hypothesis from {:.3}: innovation {:.2} m, horizontal std {:.2} m",
            m.timestamp,
            innovation.norm(),
            state.position_std().xy().norm()
        );
    }

    fn seed(&mut self, m: &PoseMeasurement, now: f64) {
        let mut mean = Vector6::zeros();
        mean.fixed_rows_mut::<3>(0).copy_from(&m.position_enu);
        self.state = Some(FilterState {
            mean,
            covariance: initial_covariance(&self.config),
            attitude: m.attitude,
            attitude_variance: Vector3::repeat(self.config.attitude_measurement_std_rad.powi(2)),
            last_update: now,
        });
        self.phase = FilterPhase::Initialized;
        info!(
            "Filter seeded at ENU ({:.1}, {:.1}, {:.1})",
            m.position_enu.x, m.position_enu.y, m.position_enu.z
        );
    }

    fn is_relevant(&self, m: &PoseMeasurement, now: f64) -> bool {
        if !m.position_enu.iter().all(|v| v.is_finite()) || !m.timestamp.is_finite() {
            return false;
        }
        if m.timestamp < self.newest_accepted {
            debug!(
                "Discarding hypothesis from {:.3}: older than accepted {:.3}",
                m.timestamp, self.newest_accepted
            );
            return false;
        }
        if now - m.timestamp > self.config.max_hypothesis_age_s {
            debug!("Discarding hypothesis from {:.3}: {:.2}s old", m.timestamp, now - m.timestamp);
            return false;
        }
        true
    }

    /// Reset to `Uninitialized` when the horizontal std exceeds the bound.
    fn check_divergence(&mut self) -> bool {
        let Some(state) = self.state.as_ref() else {
            return false;
        };
        let std = state.position_std();
        let horizontal = std.x.max(std.y);
        if horizontal.is_finite() && horizontal <= self.config.divergence_std_m {
            return false;
        }
        warn!(
            "Filter diverged (horizontal std {:.1} m > {:.1} m), waiting for a new fix",
            horizontal, self.config.divergence_std_m
        );
        self.state = None;
        self.phase = FilterPhase::Uninitialized;
        true
    }
}

fn transition(dt: f64) -> Matrix6 {
    let mut f = Matrix6::identity();
    f.fixed_view_mut::<3, 3>(0, 3).copy_from(&(Matrix3::identity() * dt));
    f
}

fn process_noise(dt: f64, accel_std: f64) -> Matrix6 {
    let q = accel_std * accel_std;
    let dt2 = dt * dt;
    let mut m = Matrix6::zeros();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(&(Matrix3::identity() * (q * dt2 * dt2 / 4.0)));
    m.fixed_view_mut::<3, 3>(0, 3).copy_from(&(Matrix3::identity() * (q * dt2 * dt / 2.0)));
    m.fixed_view_mut::<3, 3>(3, 0).copy_from(&(Matrix3::identity() * (q * dt2 * dt / 2.0)));
    m.fixed_view_mut::<3, 3>(3, 3).copy_from(&(Matrix3::identity() * (q * dt2)));
    m
}

/// `H = [I  -delay·I]`: the position `delay` seconds before the state time.
fn measurement_matrix(delay: f64) -> Matrix3x6 {
    let mut h = Matrix3x6::zeros();
    h.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
    h.fixed_view_mut::<3, 3>(0, 3).copy_from(&(Matrix3::identity() * -delay));
    h
}

fn measurement_noise(config: &FilterConfig) -> Matrix3<f64> {
    let h = config.horizontal_measurement_std_m.powi(2);
    let v = config.vertical_measurement_std_m.powi(2);
    Matrix3::from_diagonal(&Vector3::new(h, h, v))
}

fn delayed_measurement_noise(config: &FilterConfig, delay: f64) -> Matrix3<f64> {
    let q = process_noise(delay, config.acceleration_noise);
    measurement_noise(config) + q.fixed_view::<3, 3>(0, 0).into_owned()
}

fn initial_covariance(config: &FilterConfig) -> Matrix6 {
    let h = config.horizontal_measurement_std_m.powi(2);
    let v = config.vertical_measurement_std_m.powi(2);
    let vel = config.initial_velocity_std.powi(2);
    Matrix6::from_diagonal(&Vector6::new(h, h, v, vel, vel, vel))
}

fn symmetrize(m: &Matrix6) -> Matrix6 {
    (m + m.transpose()) * 0.5
}
