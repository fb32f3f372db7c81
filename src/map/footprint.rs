//! Geographic footprints and bounding boxes.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::geometry::geodesy::meters_per_degree;
use crate::geometry::polygon;
use crate::geometry::{Crs, GeoPoint, LocalTangentPlane};

/// Axis-aligned latitude/longitude box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl GeoBBox {
    /// Square box of half-side `radius_m` centred on `center`.
    pub fn around(center: &GeoPoint, radius_m: f64) -> Self {
        let (m_lat, m_lon) = meters_per_degree(center.lat);
        let d_lat = radius_m / m_lat;
        let d_lon = radius_m / m_lon.max(1e-6);
        Self {
            min_lat: center.lat - d_lat,
            min_lon: center.lon - d_lon,
            max_lat: center.lat + d_lat,
            max_lon: center.lon + d_lon,
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            0.5 * (self.min_lat + self.max_lat),
            0.5 * (self.min_lon + self.max_lon),
        )
    }

    /// Corners counter-clockwise from south-west.
    pub fn corners(&self) -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(self.min_lat, self.min_lon),
            GeoPoint::new(self.min_lat, self.max_lon),
            GeoPoint::new(self.max_lat, self.max_lon),
            GeoPoint::new(self.max_lat, self.min_lon),
        ]
    }

    /// East-west and north-south extent in metres at the box centre.
    pub fn size_m(&self) -> (f64, f64) {
        let (m_lat, m_lon) = meters_per_degree(self.center().lat);
        (
            (self.max_lon - self.min_lon) * m_lon,
            (self.max_lat - self.min_lat) * m_lat,
        )
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&p.lat) && (self.min_lon..=self.max_lon).contains(&p.lon)
    }

    pub fn is_valid(&self) -> bool {
        [self.min_lat, self.min_lon, self.max_lat, self.max_lon]
            .iter()
            .all(|v| v.is_finite())
            && self.max_lat > self.min_lat
            && self.max_lon > self.min_lon
    }
}

/// Area covered by a reference raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFootprint {
    /// Bounding polygon vertices.
    pub polygon: Vec<GeoPoint>,
    pub crs: Crs,
    /// Ground resolution (metres per pixel).
    pub ground_resolution_m: f64,
    /// Request/acquisition time (seconds, local clock).
    pub timestamp: f64,
}

impl GeoFootprint {
    pub fn from_bbox(bbox: &GeoBBox, ground_resolution_m: f64, timestamp: f64) -> Self {
        Self {
            polygon: bbox.corners(),
            crs: Crs::Wgs84,
            ground_resolution_m,
            timestamp,
        }
    }

    /// Fraction of `other`'s area that lies inside this footprint, in `[0, 1]`.
    ///
    /// Both polygons are mapped to a tangent plane at this footprint's
    /// first vertex; this footprint must be convex.
    pub fn overlap_fraction(&self, other: &[GeoPoint]) -> f64 {
        let Some(origin) = self.polygon.first() else {
            return 0.0;
        };
        if other.len() < 3 {
            return 0.0;
        }
        let ltp = LocalTangentPlane::new(*origin, 0.0);
        let project = |poly: &[GeoPoint]| -> Vec<Point2<f64>> {
            poly.iter()
                .map(|p| {
                    let v = ltp.to_enu(p, 0.0);
                    Point2::new(v.x, v.y)
                })
                .collect()
        };
        let clip = project(&self.polygon);
        let subject = project(other);

        let subject_area = polygon::area(&subject);
        if subject_area < 1e-9 {
            return 0.0;
        }
        (polygon::intersection_area(&subject, &clip) / subject_area).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bbox_around_is_square_in_meters() {
        let bbox = GeoBBox::around(&GeoPoint::new(47.4, 8.5), 300.0);
        let (w, h) = bbox.size_m();

        assert_relative_eq!(w, 600.0, epsilon = 1.0);
        assert_relative_eq!(h, 600.0, epsilon = 1e-6);
        assert!(bbox.contains(&GeoPoint::new(47.4, 8.5)));
    }

    #[test]
    fn test_overlap_full_and_none() {
        let center = GeoPoint::new(47.4, 8.5);
        let raster = GeoFootprint::from_bbox(&GeoBBox::around(&center, 400.0), 1.0, 0.0);

        let inside = GeoBBox::around(&center, 100.0).corners();
        assert_relative_eq!(raster.overlap_fraction(&inside), 1.0, epsilon = 1e-9);

        let far = GeoBBox::around(&GeoPoint::new(47.5, 8.6), 100.0).corners();
        assert_relative_eq!(raster.overlap_fraction(&far), 0.0);
    }

    #[test]
    fn test_overlap_partial() {
        let center = GeoPoint::new(10.0, 20.0);
        let raster_box = GeoBBox::around(&center, 100.0);
        let raster = GeoFootprint::from_bbox(&raster_box, 1.0, 0.0);

        // Same-size box shifted east by 70% of its width.
        let shift = 0.7 * (raster_box.max_lon - raster_box.min_lon);
        let fov = GeoBBox {
            min_lon: raster_box.min_lon + shift,
            max_lon: raster_box.max_lon + shift,
            ..raster_box
        };

        assert_relative_eq!(raster.overlap_fraction(&fov.corners()), 0.3, epsilon = 1e-3);
    }
}
