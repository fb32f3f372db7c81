//! Map refresh policy.
//!
//! Decides from the vehicle state and the cached raster whether a new
//! reference raster is needed, and runs at most one fetch at a time on a
//! background thread. A trigger while a fetch is pending is dropped, not
//! queued.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use nalgebra::{Point2, Vector3};
use tracing::{debug, info, warn};

use super::cache::GeoRasterCache;
use super::footprint::GeoBBox;
use super::raster::GeoRaster;
use super::service::{MapRequest, MapService};
use crate::error::{NavError, Result};
use crate::geometry::polygon;
use crate::geometry::{GeoPoint, LocalTangentPlane};
use crate::system::config::MapUpdateConfig;
use crate::system::SharedState;
use crate::telemetry::VehicleState;

/// Why a refresh was triggered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshReason {
    ColdStart,
    LowOverlap { overlap: f64 },
    ResolutionMismatch { cached_m: f64, implied_m: f64 },
}

/// Result of one policy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// No usable vehicle state or field of view.
    Skipped,
    /// Cached raster is adequate.
    UpToDate,
    /// A fetch was started.
    Requested(RefreshReason),
    /// A fetch is already in flight.
    Pending,
    /// A fetch completed and the raster was installed.
    Installed { generation: u64 },
    /// A fetch completed with an error; the old raster stays.
    FetchFailed,
}

pub struct MapRefreshPolicy {
    config: MapUpdateConfig,
    service: Arc<dyn MapService>,
    cache: Arc<GeoRasterCache>,
    shared: Arc<SharedState>,
    in_flight: Option<Receiver<Result<GeoRaster>>>,
    requests_issued: u64,
}

impl MapRefreshPolicy {
    pub fn new(
        config: MapUpdateConfig,
        service: Arc<dyn MapService>,
        cache: Arc<GeoRasterCache>,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            config,
            service,
            cache,
            shared,
            in_flight: None,
            requests_issued: 0,
        }
    }

    /// Total fetches started.
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued
    }

    pub fn is_fetch_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Run one evaluation cycle.
    ///
    /// A completed fetch is installed first; while a fetch is in flight no
    /// new trigger is considered.
    pub fn evaluate(&mut self, vehicle: Option<&VehicleState>, now: f64) -> RefreshOutcome {
        if let Some(outcome) = self.poll_in_flight() {
            return outcome;
        }

        let Some(vehicle) = vehicle else {
            return RefreshOutcome::Skipped;
        };
        let Some(reason) = self.decide(vehicle) else {
            return if vehicle.fov.is_none() {
                RefreshOutcome::Skipped
            } else {
                RefreshOutcome::UpToDate
            };
        };

        let Some(request) = self.build_request(vehicle, now) else {
            return RefreshOutcome::Skipped;
        };
        info!(
            "Requesting map: {:?}, radius {:.0} m, resolution {:.2} m/px",
            reason,
            0.5 * request.bbox.size_m().1,
            request.resolution_m
        );
        match self.spawn_fetch(request) {
            Ok(()) => RefreshOutcome::Requested(reason),
            Err(e) => {
                warn!("Could not start map fetch: {}", e);
                RefreshOutcome::FetchFailed
            }
        }
    }

    /// Trigger decision for a vehicle state, ignoring any in-flight fetch.
    pub fn decide(&self, vehicle: &VehicleState) -> Option<RefreshReason> {
        let fov = vehicle.fov.as_ref()?;
        let Some(raster) = self.cache.get() else {
            return Some(RefreshReason::ColdStart);
        };

        let overlap = raster.footprint.overlap_fraction(fov);
        if overlap < self.shared.overlap_threshold() {
            return Some(RefreshReason::LowOverlap { overlap });
        }

        let cached_m = raster.gsd();
        let implied_m = self.implied_resolution(vehicle);
        if ((cached_m - implied_m) / implied_m).abs() > self.config.resolution_tolerance {
            return Some(RefreshReason::ResolutionMismatch { cached_m, implied_m });
        }
        None
    }

    /// Map radius for the current altitude: `padding × hfov × agl`, capped.
    pub fn map_radius(&self, vehicle: &VehicleState) -> f64 {
        let dynamic = self.config.radius_padding * vehicle.camera.hfov() * vehicle.position.altitude_agl;
        if dynamic > self.config.max_map_radius_m {
            debug!(
                "Dynamic map radius {:.0} m exceeds max {:.0} m",
                dynamic, self.config.max_map_radius_m
            );
            self.config.max_map_radius_m
        } else {
            dynamic
        }
    }

    pub fn implied_resolution(&self, vehicle: &VehicleState) -> f64 {
        2.0 * self.map_radius(vehicle) / self.config.map_size_px as f64
    }

    /// Square request centred on the field of view (or the vehicle).
    pub fn build_request(&self, vehicle: &VehicleState, now: f64) -> Option<MapRequest> {
        let radius = self.map_radius(vehicle);
        if !(radius > 0.0) {
            return None;
        }
        let center = if self.config.center_on_fov {
            vehicle
                .fov
                .as_deref()
                .and_then(fov_center)
                .unwrap_or(vehicle.position.point)
        } else {
            vehicle.position.point
        };
        Some(MapRequest {
            bbox: GeoBBox::around(&center, radius),
            width_px: self.config.map_size_px,
            height_px: self.config.map_size_px,
            resolution_m: 2.0 * radius / self.config.map_size_px as f64,
            timestamp: now,
        })
    }

    fn poll_in_flight(&mut self) -> Option<RefreshOutcome> {
        let rx = self.in_flight.as_ref()?;
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return Some(RefreshOutcome::Pending),
            Err(TryRecvError::Disconnected) => {
                Err(NavError::MapFetch("fetch thread exited without a result".into()))
            }
        };
        self.in_flight = None;

        Some(match result {
            Ok(raster) => {
                let gsd = raster.gsd();
                let generation = self.cache.replace(raster);
                info!("Installed map #{} ({:.2} m/px)", generation, gsd);
                RefreshOutcome::Installed { generation }
            }
            Err(e) => {
                warn!("Map fetch failed, keeping previous map: {}", e);
                RefreshOutcome::FetchFailed
            }
        })
    }

    fn spawn_fetch(&mut self, request: MapRequest) -> std::io::Result<()> {
        let (tx, rx) = bounded(1);
        let service = self.service.clone();
        thread::Builder::new().name("map-fetch".into()).spawn(move || {
            let result = service.fetch(&request);
            // Receiver is gone if the system shut down meanwhile.
            let _ = tx.send(result);
        })?;
        self.in_flight = Some(rx);
        self.requests_issued += 1;
        Ok(())
    }
}

fn fov_center(fov: &[GeoPoint]) -> Option<GeoPoint> {
    let origin = *fov.first()?;
    let ltp = LocalTangentPlane::new(origin, 0.0);
    let pts: Vec<_> = fov
        .iter()
        .map(|p| {
            let v = ltp.to_enu(p, 0.0);
            Point2::new(v.x, v.y)
        })
        .collect();
    let c = polygon::centroid(&pts)?;
    Some(ltp.from_enu(&Vector3::new(c.x, c.y, 0.0)).0)
}
