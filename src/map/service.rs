//! Map-tile service interface.

use serde::{Deserialize, Serialize};

use super::footprint::GeoBBox;
use super::raster::GeoRaster;
use crate::error::Result;

/// Request for a reference raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRequest {
    pub bbox: GeoBBox,
    /// Output image width and height in pixels.
    pub width_px: u32,
    pub height_px: u32,
    /// Resolution implied by the request (metres per pixel).
    pub resolution_m: f64,
    /// Local time the request was issued.
    pub timestamp: f64,
}

/// A source of georeferenced rasters (e.g. a WMS endpoint).
///
/// Implementations may block; calls are made off the control thread.
pub trait MapService: Send + Sync {
    fn fetch(&self, request: &MapRequest) -> Result<GeoRaster>;
}
