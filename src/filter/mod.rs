//! Recursive state filter.
//!
//! Fuses intermittent, delayed pose hypotheses into a continuous estimate on
//! a fixed cadence:
//! 1. Predict every tick (constant-velocity model, covariance grows)
//! 2. Correct with each relevant hypothesis (covariance shrinks)
//! 3. Check divergence; a diverged filter stops publishing until reseeded

mod kalman;
pub mod state;
pub mod types;

pub use kalman::{NavFilter, TickOutcome};
pub use state::{FilterPhase, FilterSnapshot, FilterState, PoseMeasurement};
