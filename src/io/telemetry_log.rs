//! Recorded telemetry in CSV form.
//!
//! One row per sample, with a header:
//!
//! ```text
//! timestamp,lat,lon,altitude_amsl,altitude_agl,roll_deg,pitch_deg,yaw_deg,reference_time
//! ```
//!
//! Angles are the vehicle attitude (NED, ZYX Euler). `reference_time` may be
//! left empty. Lines starting with `#` are ignored.

use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::geometry::{CameraIntrinsics, GeoPoint, GeoPosition};
use crate::telemetry::Telemetry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: f64,
    pub lat: f64,
    pub lon: f64,
    pub altitude_amsl: f64,
    pub altitude_agl: f64,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    #[serde(default)]
    pub reference_time: Option<f64>,
}

impl TelemetryRecord {
    pub fn to_telemetry(&self, camera: &CameraIntrinsics) -> Telemetry {
        let attitude = UnitQuaternion::from_euler_angles(
            self.roll_deg.to_radians(),
            self.pitch_deg.to_radians(),
            self.yaw_deg.to_radians(),
        );
        Telemetry {
            timestamp: self.timestamp,
            position: Some(GeoPosition {
                point: GeoPoint::new(self.lat, self.lon),
                altitude_amsl: self.altitude_amsl,
                altitude_agl: self.altitude_agl,
            }),
            vehicle_attitude: Some(attitude),
            camera_attitude: None,
            camera: Some(*camera),
            reference_time: self.reference_time,
        }
    }
}

/// Time-ordered telemetry log.
#[derive(Debug, Clone, Default)]
pub struct TelemetryLog {
    pub records: Vec<TelemetryRecord>,
}

impl TelemetryLog {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut records = Vec::new();
        for (i, row) in rdr.deserialize::<TelemetryRecord>().enumerate() {
            let record = row.with_context(|| format!("{}: bad record {}", path.display(), i + 1))?;
            if let Some(prev) = records.last().map(|r: &TelemetryRecord| r.timestamp) {
                if record.timestamp < prev {
                    bail!(
                        "{}: timestamps go backwards at record {} ({} < {})",
                        path.display(),
                        i + 1,
                        record.timestamp,
                        prev
                    );
                }
            }
            records.push(record);
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Latest record at or before `t`.
    pub fn at(&self, t: f64) -> Option<&TelemetryRecord> {
        let idx = self.records.partition_point(|r| r.timestamp <= t);
        idx.checked_sub(1).map(|i| &self.records[i])
    }

    /// Time span covered by the log.
    pub fn span(&self) -> Option<(f64, f64)> {
        Some((self.records.first()?.timestamp, self.records.last()?.timestamp))
    }
}
