//! State shared between the control thread and external controllers.
//!
//! Holds the runtime-adjustable knobs and flags. Everything else is
//! threaded through constructors as immutable configuration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared flags and runtime-adjustable parameters.
pub struct SharedState {
    /// Overlap threshold stored as `f64` bits. Single writer
    /// (`set_overlap_threshold`), many readers.
    overlap_threshold: AtomicU64,

    /// Request the navigation loop to stop.
    shutdown_requested: AtomicBool,
}

impl SharedState {
    pub fn new(overlap_threshold: f64) -> Arc<Self> {
        Arc::new(Self {
            overlap_threshold: AtomicU64::new(overlap_threshold.to_bits()),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn overlap_threshold(&self) -> f64 {
        f64::from_bits(self.overlap_threshold.load(Ordering::Acquire))
    }

    /// Change the overlap threshold. Values outside `(0, 1]` are rejected.
    pub fn set_overlap_threshold(&self, value: f64) -> bool {
        if !(value > 0.0 && value <= 1.0) {
            return false;
        }
        self.overlap_threshold.store(value.to_bits(), Ordering::Release);
        true
    }

    /// Request shutdown of the navigation loop.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown was requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            overlap_threshold: AtomicU64::new(0.5f64.to_bits()),
            shutdown_requested: AtomicBool::new(false),
        }
    }
}
