//! WGS84 geographic coordinates and a local tangent plane.
//!
//! The tangent plane uses the ellipsoid radii of curvature at its origin,
//! which is accurate to well below a metre over the few kilometres a single
//! reference raster covers.

use std::fmt;
use std::str::FromStr;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::NavError;

/// WGS84 semi-major axis (m).
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared.
pub const WGS84_E2: f64 = 6.694_379_990_14e-3;

/// Coordinate reference systems understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Crs {
    /// Geographic WGS84 (EPSG:4326), degrees.
    #[default]
    Wgs84,
}

impl Crs {
    pub fn as_str(&self) -> &'static str {
        match self {
            Crs::Wgs84 => "EPSG:4326",
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Crs {
    type Err = NavError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EPSG:4326" | "WGS84" | "WGS 84" => Ok(Crs::Wgs84),
            other => Err(NavError::UnsupportedCrs(other.to_string())),
        }
    }
}

/// Latitude/longitude pair in degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite() && self.lat.abs() <= 90.0 && self.lon.abs() <= 180.0
    }
}

/// Global position of the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub point: GeoPoint,
    /// Altitude above mean sea level (m).
    pub altitude_amsl: f64,
    /// Altitude above ground level (m).
    pub altitude_agl: f64,
}

impl GeoPosition {
    /// Terrain elevation below the vehicle (AMSL).
    pub fn ground_elevation(&self) -> f64 {
        self.altitude_amsl - self.altitude_agl
    }
}

/// Meridional and prime-vertical radii of curvature at a latitude.
fn radii_of_curvature(lat_rad: f64) -> (f64, f64) {
    let s = lat_rad.sin();
    let w2 = 1.0 - WGS84_E2 * s * s;
    let n = WGS84_A / w2.sqrt();
    let m = WGS84_A * (1.0 - WGS84_E2) / (w2 * w2.sqrt());
    (m, n)
}

/// Metres per degree of latitude and longitude at a latitude.
pub fn meters_per_degree(lat_deg: f64) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let (m, n) = radii_of_curvature(lat);
    (m.to_radians(), (n * lat.cos()).to_radians())
}

/// East-north-up tangent plane anchored at a geographic origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTangentPlane {
    origin: GeoPoint,
    origin_alt: f64,
    meridional_radius: f64,
    normal_radius: f64,
}

impl LocalTangentPlane {
    pub fn new(origin: GeoPoint, origin_alt: f64) -> Self {
        let (m, n) = radii_of_curvature(origin.lat.to_radians());
        Self {
            origin,
            origin_alt,
            meridional_radius: m,
            normal_radius: n,
        }
    }

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    pub fn origin_alt(&self) -> f64 {
        self.origin_alt
    }

    /// ENU metres of a geographic point at an altitude AMSL.
    pub fn to_enu(&self, point: &GeoPoint, alt: f64) -> Vector3<f64> {
        let lat0 = self.origin.lat.to_radians();
        let d_lat = (point.lat - self.origin.lat).to_radians();
        let d_lon = wrap_degrees(point.lon - self.origin.lon).to_radians();
        Vector3::new(
            d_lon * (self.normal_radius + self.origin_alt) * lat0.cos(),
            d_lat * (self.meridional_radius + self.origin_alt),
            alt - self.origin_alt,
        )
    }

    /// Geographic point and altitude AMSL of an ENU position.
    pub fn from_enu(&self, enu: &Vector3<f64>) -> (GeoPoint, f64) {
        let lat0 = self.origin.lat.to_radians();
        let d_lat = enu.y / (self.meridional_radius + self.origin_alt);
        let d_lon = enu.x / ((self.normal_radius + self.origin_alt) * lat0.cos());
        let point = GeoPoint::new(
            self.origin.lat + d_lat.to_degrees(),
            wrap_degrees(self.origin.lon + d_lon.to_degrees()),
        );
        (point, self.origin_alt + enu.z)
    }
}

/// Wrap a longitude difference into `[-180, 180)`.
fn wrap_degrees(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}
