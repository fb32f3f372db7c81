//! GNSS-substitute message.
//!
//! Field layout follows the MAVLink `GPS_INPUT` message so the estimate can
//! be injected into an autopilot in place of a receiver fix.

use serde::{Deserialize, Serialize};

use super::OutputRecord;
use crate::geometry::frames::image_heading;

/// Unix time of the GPS epoch (1980-01-06T00:00:00Z).
pub const GPS_EPOCH_UNIX_S: f64 = 315_964_800.0;

/// GPS-UTC offset in seconds.
pub const GPS_LEAP_SECONDS: f64 = 18.0;

const SECONDS_PER_WEEK: f64 = 604_800.0;

/// `GPS_INPUT_IGNORE_FLAGS`: velocity and speed accuracy are not provided.
pub const IGNORE_VELOCITY: u16 = 8 | 16 | 32;

/// 3-D fix.
pub const FIX_TYPE_3D: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsMessage {
    /// Unix time of the fix (µs).
    pub time_usec: u64,
    pub ignore_flags: u16,
    pub time_week: u16,
    pub time_week_ms: u32,
    pub fix_type: u8,
    /// Latitude (degE7).
    pub lat: i32,
    /// Longitude (degE7).
    pub lon: i32,
    /// Altitude AMSL (m).
    pub alt: f32,
    /// Horizontal accuracy (m).
    pub horiz_accuracy: f32,
    /// Vertical accuracy (m).
    pub vert_accuracy: f32,
    pub satellites_visible: u8,
    /// Heading in centidegrees, `1..=36000`; 0 means unknown.
    pub yaw: u16,
}

impl GpsMessage {
    pub fn from_record(record: &OutputRecord) -> Self {
        let (time_week, time_week_ms) = gps_week_time(record.timestamp);
        Self {
            time_usec: (record.timestamp.max(0.0) * 1e6) as u64,
            ignore_flags: IGNORE_VELOCITY,
            time_week,
            time_week_ms,
            fix_type: FIX_TYPE_3D,
            lat: (record.lat * 1e7).round() as i32,
            lon: (record.lon * 1e7).round() as i32,
            alt: record.altitude_amsl as f32,
            horiz_accuracy: record.horizontal_std_m as f32,
            vert_accuracy: record.vertical_std_m as f32,
            satellites_visible: u8::MAX,
            yaw: yaw_centidegrees(image_heading(&record.attitude)),
        }
    }
}

/// GPS week number and time of week (ms) of a Unix timestamp.
pub fn gps_week_time(unix_s: f64) -> (u16, u32) {
    let gps_s = (unix_s - GPS_EPOCH_UNIX_S + GPS_LEAP_SECONDS).max(0.0);
    let week = (gps_s / SECONDS_PER_WEEK).floor();
    let tow_ms = ((gps_s - week * SECONDS_PER_WEEK) * 1e3).floor();
    (week as u16, tow_ms as u32)
}

/// Heading in radians to MAVLink centidegrees, where 0 is reserved for
/// "unknown" and north is sent as 36000.
pub fn yaw_centidegrees(heading_rad: f64) -> u16 {
    let cdeg = (heading_rad.rem_euclid(std::f64::consts::TAU).to_degrees() * 100.0).round() as u16;
    match cdeg {
        0 => 36000,
        c => c.min(36000),
    }
}
