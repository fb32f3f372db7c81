//! Filter snapshot to output record.

use crate::filter::FilterSnapshot;
use crate::geometry::{Crs, LocalTangentPlane};

use super::clock::ClockSync;
use super::OutputRecord;

/// Pure conversion of filter state into [`OutputRecord`]s.
#[derive(Debug, Clone, Copy)]
pub struct OutputAssembler {
    crs: Crs,
}

impl OutputAssembler {
    pub fn new(crs: Crs) -> Self {
        Self { crs }
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// `origin` is the tangent plane the filter's ENU state is expressed
    /// in; `ground_elevation` is the terrain height (AMSL) under the vehicle.
    pub fn assemble(
        &self,
        snapshot: &FilterSnapshot,
        origin: &LocalTangentPlane,
        ground_elevation: f64,
        clock: &ClockSync,
    ) -> OutputRecord {
        let (point, altitude_amsl) = origin.from_enu(&snapshot.position_enu);
        let std = snapshot.position_std;
        OutputRecord {
            lat: point.lat,
            lon: point.lon,
            altitude_amsl,
            altitude_agl: altitude_amsl - ground_elevation,
            attitude: snapshot.attitude,
            crs: self.crs,
            horizontal_std_m: (std.x * std.x + std.y * std.y).sqrt(),
            vertical_std_m: std.z,
            timestamp: clock.to_reference(snapshot.timestamp),
        }
    }
}
