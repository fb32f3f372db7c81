//! Georeferenced reference raster.

use image::GrayImage;
use nalgebra::Point2;

use super::footprint::{GeoBBox, GeoFootprint};
use crate::error::{NavError, Result};
use crate::geometry::GeoPoint;

/// North-up greyscale orthoimage and where it lies on the ground.
///
/// Pixel `(col, row)` covers longitude increasing with `col` and latitude
/// decreasing with `row`; the pixel centre is at `(col + 0.5, row + 0.5)`.
#[derive(Debug, Clone)]
pub struct GeoRaster {
    pub image: GrayImage,
    pub bbox: GeoBBox,
    pub footprint: GeoFootprint,
}

impl GeoRaster {
    /// Build a raster; the footprint's resolution is derived from the box.
    pub fn new(image: GrayImage, bbox: GeoBBox, timestamp: f64) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(NavError::MapFetch("empty raster".into()));
        }
        if !bbox.is_valid() {
            return Err(NavError::MapFetch(format!("invalid bounding box {:?}", bbox)));
        }
        let (w_m, h_m) = bbox.size_m();
        let gsd = 0.5 * (w_m / image.width() as f64 + h_m / image.height() as f64);
        let footprint = GeoFootprint::from_bbox(&bbox, gsd, timestamp);
        Ok(Self {
            image,
            bbox,
            footprint,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Ground sampling distance (metres per pixel).
    pub fn gsd(&self) -> f64 {
        self.footprint.ground_resolution_m
    }

    pub fn pixel_to_geo(&self, px: &Point2<f64>) -> GeoPoint {
        let u = px.x / self.width() as f64;
        let v = px.y / self.height() as f64;
        GeoPoint::new(
            self.bbox.max_lat - v * (self.bbox.max_lat - self.bbox.min_lat),
            self.bbox.min_lon + u * (self.bbox.max_lon - self.bbox.min_lon),
        )
    }

    pub fn geo_to_pixel(&self, p: &GeoPoint) -> Point2<f64> {
        let u = (p.lon - self.bbox.min_lon) / (self.bbox.max_lon - self.bbox.min_lon);
        let v = (self.bbox.max_lat - p.lat) / (self.bbox.max_lat - self.bbox.min_lat);
        Point2::new(u * self.width() as f64, v * self.height() as f64)
    }

    /// Bilinear sample at a continuous pixel position (pixel centres at
    /// `+0.5`). `None` outside the raster.
    pub fn sample(&self, px: &Point2<f64>) -> Option<f64> {
        sample_bilinear(&self.image, px)
    }
}

/// Bilinear interpolation on a greyscale image with pixel centres at `+0.5`.
pub fn sample_bilinear(image: &GrayImage, px: &Point2<f64>) -> Option<f64> {
    let x = px.x - 0.5;
    let y = px.y - 0.5;
    let (w, h) = (image.width() as f64, image.height() as f64);
    if !(x >= 0.0 && y >= 0.0 && x <= w - 1.0 && y <= h - 1.0) {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p = |xx: u32, yy: u32| image.get_pixel(xx, yy).0[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    fn raster() -> GeoRaster {
        let bbox = GeoBBox::around(&GeoPoint::new(47.0, 8.0), 256.0);
        let image = GrayImage::from_fn(512, 512, |x, y| Luma([((x + y) % 256) as u8]));
        GeoRaster::new(image, bbox, 12.0).unwrap()
    }

    #[test]
    fn test_gsd_from_bbox() {
        assert_relative_eq!(raster().gsd(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_pixel_geo_roundtrip() {
        let r = raster();
        let px = Point2::new(100.25, 380.5);
        assert_relative_eq!(r.geo_to_pixel(&r.pixel_to_geo(&px)), px, epsilon = 1e-6);

        // Top-left is the north-west corner.
        let nw = r.pixel_to_geo(&Point2::origin());
        assert_relative_eq!(nw.lat, r.bbox.max_lat);
        assert_relative_eq!(nw.lon, r.bbox.min_lon);
    }

    #[test]
    fn test_bilinear_sample() {
        let r = raster();
        assert_relative_eq!(r.sample(&Point2::new(10.5, 20.5)).unwrap(), 30.0);
        assert_relative_eq!(r.sample(&Point2::new(11.0, 20.5)).unwrap(), 30.5);
        assert!(r.sample(&Point2::new(-1.0, 3.0)).is_none());
    }

    #[test]
    fn test_rejects_empty_image() {
        let bbox = GeoBBox::around(&GeoPoint::new(0.0, 0.0), 10.0);
        assert!(GeoRaster::new(GrayImage::new(0, 0), bbox, 0.0).is_err());
    }
}
