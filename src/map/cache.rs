//! Holder of the current reference raster.
//!
//! Rasters are immutable once installed. `replace` swaps a single
//! `Arc<GeoRaster>`, so a reader holding the result of `get` always sees a
//! complete (raster, footprint) pair, old or new.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::raster::GeoRaster;

#[derive(Default)]
pub struct GeoRasterCache {
    current: RwLock<Option<Arc<GeoRaster>>>,
    generation: AtomicU64,
}

impl GeoRasterCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current raster, if one has been installed.
    pub fn get(&self) -> Option<Arc<GeoRaster>> {
        self.current.read().clone()
    }

    /// Install a new raster and return its generation number (starting at 1).
    pub fn replace(&self, raster: GeoRaster) -> u64 {
        let raster = Arc::new(raster);
        let mut slot = self.current.write();
        *slot = Some(raster);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of rasters installed so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoPoint;
    use crate::map::footprint::GeoBBox;
    use image::{GrayImage, Luma};
    use std::thread;

    /// Raster whose every pixel and footprint timestamp both encode `tag`.
    fn tagged_raster(tag: u8) -> GeoRaster {
        let bbox = GeoBBox::around(&GeoPoint::new(45.0, 7.0), 50.0 + tag as f64);
        let image = GrayImage::from_pixel(64, 64, Luma([tag]));
        GeoRaster::new(image, bbox, tag as f64).unwrap()
    }

    #[test]
    fn test_empty_then_replace() {
        let cache = GeoRasterCache::new();
        assert!(cache.get().is_none());

        assert_eq!(cache.replace(tagged_raster(1)), 1);
        assert_eq!(cache.replace(tagged_raster(2)), 2);
        assert_eq!(cache.get().unwrap().footprint.timestamp, 2.0);
    }

    #[test]
    fn test_reader_keeps_old_snapshot() {
        let cache = GeoRasterCache::new();
        cache.replace(tagged_raster(3));
        let held = cache.get().unwrap();

        cache.replace(tagged_raster(4));

        assert_eq!(held.image.get_pixel(0, 0).0[0], 3);
        assert_eq!(cache.get().unwrap().image.get_pixel(0, 0).0[0], 4);
    }

    #[test]
    fn test_concurrent_get_never_torn() {
        let cache = GeoRasterCache::new();
        cache.replace(tagged_raster(0));

        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for tag in 1..=200u8 {
                    cache.replace(tagged_raster(tag));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let r = cache.get().unwrap();
                        let tag = r.footprint.timestamp as u8;
                        let (w, h) = (r.width(), r.height());
                        assert!(r.image.pixels().all(|p| p.0[0] == tag));
                        assert_eq!(r.image.get_pixel(w - 1, h - 1).0[0], tag);
                        let expected = GeoBBox::around(&GeoPoint::new(45.0, 7.0), 50.0 + tag as f64);
                        assert_eq!(r.bbox, expected);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cache.generation(), 201);
    }
}
