//! Reference map handling: footprints, rasters, the raster cache and the
//! refresh policy that keeps it current.

pub mod cache;
pub mod footprint;
pub mod raster;
pub mod refresh;
pub mod service;

pub use cache::GeoRasterCache;
pub use footprint::{GeoBBox, GeoFootprint};
pub use raster::GeoRaster;
pub use refresh::{MapRefreshPolicy, RefreshOutcome, RefreshReason};
pub use service::{MapRequest, MapService};
