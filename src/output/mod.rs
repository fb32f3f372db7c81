//! Output assembly and publication.
//!
//! The assembler turns a filter snapshot into an [`OutputRecord`]; the
//! control path hands every tick's [`Estimate`] to a [`PublicationSink`].

mod assembler;
mod clock;
pub mod gps;
mod sink;

pub use assembler::OutputAssembler;
pub use clock::ClockSync;
pub use gps::GpsMessage;
pub use sink::{ChannelSink, LoggingSink, PublicationSink};

use nalgebra::UnitQuaternion;

use crate::geometry::Crs;

/// Externally published navigation estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub lat: f64,
    pub lon: f64,
    pub altitude_amsl: f64,
    pub altitude_agl: f64,
    /// Camera attitude `R_ned_cam`.
    pub attitude: UnitQuaternion<f64>,
    pub crs: Crs,
    /// Horizontal standard deviation (m).
    pub horizontal_std_m: f64,
    /// Vertical standard deviation (m).
    pub vertical_std_m: f64,
    /// External reference clock (seconds since the Unix epoch).
    pub timestamp: f64,
}

/// What is published each tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Estimate {
    Confident(OutputRecord),
    /// Uninitialized or diverged; nothing trustworthy to report.
    NoConfidentEstimate,
}

impl Estimate {
    pub fn record(&self) -> Option<&OutputRecord> {
        match self {
            Estimate::Confident(record) => Some(record),
            Estimate::NoConfidentEstimate => None,
        }
    }

    pub fn is_confident(&self) -> bool {
        matches!(self, Estimate::Confident(_))
    }
}
