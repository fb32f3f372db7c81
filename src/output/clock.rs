//! Local clock to external reference clock alignment.

use tracing::info;

/// Offset steps larger than this reset the estimate (seconds).
const MAX_OFFSET_STEP_S: f64 = 1.0;

/// Number of samples the running offset mean spans.
const WINDOW: u32 = 10;

/// Tracks `reference - local` from paired clock readings.
#[derive(Debug, Clone, Default)]
pub struct ClockSync {
    offset: Option<f64>,
    samples: u32,
}

impl ClockSync {
    /// Record that the reference clock read `reference` at local time `local`.
    pub fn observe(&mut self, local: f64, reference: f64) {
        let sample = reference - local;
        if !sample.is_finite() {
            return;
        }
        match self.offset {
            Some(offset) if (sample - offset).abs() <= MAX_OFFSET_STEP_S => {
                self.samples = (self.samples + 1).min(WINDOW);
                self.offset = Some(offset + (sample - offset) / self.samples as f64);
            }
            previous => {
                if previous.is_some() {
                    info!("Reference clock stepped, resynchronising");
                }
                self.offset = Some(sample);
                self.samples = 1;
            }
        }
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    pub fn is_synced(&self) -> bool {
        self.offset.is_some()
    }

    /// Reference time of a local timestamp; the local time itself until
    /// the first observation.
    pub fn to_reference(&self, local: f64) -> f64 {
        local + self.offset.unwrap_or(0.0)
    }
}
