//! Keypoint detection and matching on greyscale images.
//!
//! Harris corners, described by a normalised intensity patch, matched by
//! mutual nearest neighbour with a ratio test.

use image::GrayImage;
use nalgebra::Point2;

/// Ratio test threshold (best/second_best)
pub const NN_RATIO: f32 = 0.75;

/// Matched pixel locations, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct Correspondences {
    pub query: Vec<Point2<f64>>,
    pub reference: Vec<Point2<f64>>,
}

impl Correspondences {
    pub fn len(&self) -> usize {
        self.query.len()
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    pub fn push(&mut self, query: Point2<f64>, reference: Point2<f64>) {
        self.query.push(query);
        self.reference.push(reference);
    }
}

/// Detected corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    pub response: f32,
}

impl Keypoint {
    /// Pixel-centre position.
    pub fn point(&self) -> Point2<f64> {
        Point2::new(self.x as f64 + 0.5, self.y as f64 + 0.5)
    }
}

/// Keypoints and their descriptors (one row of `descriptor_len` per keypoint).
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<f32>,
    pub descriptor_len: usize,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn descriptor(&self, i: usize) -> &[f32] {
        &self.descriptors[i * self.descriptor_len..(i + 1) * self.descriptor_len]
    }
}

/// Configuration for [`PatchMatcher`].
#[derive(Debug, Clone)]
pub struct PatchMatcherConfig {
    /// Maximum keypoints kept per image (strongest first).
    pub max_features: usize,
    /// Harris sensitivity `k` in `det - k·trace²`.
    pub harris_k: f32,
    /// Responses below this fraction of the image maximum are dropped.
    pub min_response_ratio: f32,
    /// Non-maximum suppression radius (pixels).
    pub nms_radius: u32,
    /// Half-size of the descriptor patch (pixels).
    pub patch_radius: u32,
    /// Sampling stride inside the patch (pixels).
    pub patch_stride: u32,
    /// Maximum L2 distance between unit descriptors.
    pub max_descriptor_distance: f32,
}

impl Default for PatchMatcherConfig {
    fn default() -> Self {
        Self {
            max_features: 400,
            harris_k: 0.04,
            min_response_ratio: 0.01,
            nms_radius: 3,
            patch_radius: 8,
            patch_stride: 2,
            max_descriptor_distance: 0.8,
        }
    }
}

pub struct PatchMatcher {
    config: PatchMatcherConfig,
}

impl PatchMatcher {
    pub fn new(config: PatchMatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatchMatcherConfig {
        &self.config
    }

    /// Detect and describe corners. Pixels with `valid[i] == false` are
    /// excluded from every descriptor patch.
    pub fn detect(&self, image: &GrayImage, valid: Option<&[bool]>) -> FeatureSet {
        let (w, h) = image.dimensions();
        let margin = self.config.patch_radius + 1;
        let descriptor_len = {
            let side = (2 * self.config.patch_radius / self.config.patch_stride.max(1) + 1) as usize;
            side * side
        };
        let mut features = FeatureSet {
            descriptor_len,
            ..Default::default()
        };
        if w <= 2 * margin || h <= 2 * margin {
            return features;
        }

        let response = harris_response(image, self.config.harris_k);
        let max_response = response.iter().cloned().fold(0.0f32, f32::max);
        if max_response <= 0.0 {
            return features;
        }
        let threshold = self.config.min_response_ratio * max_response;

        let mut candidates = Vec::new();
        for y in margin..h - margin {
            for x in margin..w - margin {
                let r = response[(y * w + x) as usize];
                if r > threshold && is_local_max(&response, w, h, x, y, self.config.nms_radius) {
                    candidates.push(Keypoint { x, y, response: r });
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.response
                .total_cmp(&a.response)
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });

        for kp in candidates {
            if features.len() >= self.config.max_features {
                break;
            }
            if let Some(desc) = self.describe(image, valid, kp.x, kp.y) {
                features.keypoints.push(kp);
                features.descriptors.extend_from_slice(&desc);
            }
        }
        features
    }

    /// Mutual nearest-neighbour matches `(query_idx, reference_idx)` that
    /// pass the ratio test.
    pub fn match_features(&self, query: &FeatureSet, reference: &FeatureSet) -> Vec<(usize, usize)> {
        if query.is_empty() || reference.is_empty() || query.descriptor_len != reference.descriptor_len {
            return Vec::new();
        }

        // Best query for every reference feature, for the mutual check.
        let mut best_for_ref = vec![(f32::INFINITY, usize::MAX); reference.len()];
        let mut forward = Vec::with_capacity(query.len());

        for qi in 0..query.len() {
            let qd = query.descriptor(qi);
            let mut best_dist = f32::INFINITY;
            let mut second_best_dist = f32::INFINITY;
            let mut best_idx = usize::MAX;

            for (ri, slot) in best_for_ref.iter_mut().enumerate() {
                let dist = l2(qd, reference.descriptor(ri));
                if dist < best_dist {
                    second_best_dist = best_dist;
                    best_dist = dist;
                    best_idx = ri;
                } else if dist < second_best_dist {
                    second_best_dist = dist;
                }
                if dist < slot.0 {
                    *slot = (dist, qi);
                }
            }
            forward.push((best_idx, best_dist, second_best_dist));
        }

        forward
            .into_iter()
            .enumerate()
            .filter_map(|(qi, (ri, best, second))| {
                if ri == usize::MAX || best > self.config.max_descriptor_distance {
                    return None;
                }
                // Apply ratio test (Lowe's ratio)
                if second.is_finite() && best >= NN_RATIO * second {
                    return None;
                }
                (best_for_ref[ri].1 == qi).then_some((qi, ri))
            })
            .collect()
    }

    /// Zero-mean, unit-norm patch descriptor. `None` for flat or masked
    /// patches.
    fn describe(&self, image: &GrayImage, valid: Option<&[bool]>, x: u32, y: u32) -> Option<Vec<f32>> {
        let r = self.config.patch_radius as i64;
        let stride = self.config.patch_stride.max(1) as usize;
        let w = image.width();
        let mut values = Vec::new();

        for dy in (-r..=r).step_by(stride) {
            for dx in (-r..=r).step_by(stride) {
                let px = (x as i64 + dx) as u32;
                let py = (y as i64 + dy) as u32;
                if let Some(mask) = valid {
                    if !mask.get((py * w + px) as usize).copied().unwrap_or(false) {
                        return None;
                    }
                }
                values.push(image.get_pixel(px, py).0[0] as f32);
            }
        }

        let mean = values.iter().sum::<f32>() / values.len() as f32;
        values.iter_mut().for_each(|v| *v -= mean);
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < 1e-3 {
            return None;
        }
        values.iter_mut().for_each(|v| *v /= norm);
        Some(values)
    }
}

impl Default for PatchMatcher {
    fn default() -> Self {
        Self::new(PatchMatcherConfig::default())
    }
}

/// Harris corner response with Sobel gradients and a 5×5 box window.
fn harris_response(image: &GrayImage, k: f32) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let (wi, hi) = (w as usize, h as usize);
    let px = |x: usize, y: usize| image.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0;

    let mut ixx = vec![0.0f32; wi * hi];
    let mut iyy = vec![0.0f32; wi * hi];
    let mut ixy = vec![0.0f32; wi * hi];
    for y in 1..hi.saturating_sub(1) {
        for x in 1..wi.saturating_sub(1) {
            let gx = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            let gy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
            let i = y * wi + x;
            ixx[i] = gx * gx;
            iyy[i] = gy * gy;
            ixy[i] = gx * gy;
        }
    }

    const WINDOW: usize = 2;
    let mut response = vec![0.0f32; wi * hi];
    for y in WINDOW..hi.saturating_sub(WINDOW) {
        for x in WINDOW..wi.saturating_sub(WINDOW) {
            let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
            for yy in y - WINDOW..=y + WINDOW {
                let row = yy * wi;
                for xx in x - WINDOW..=x + WINDOW {
                    sxx += ixx[row + xx];
                    syy += iyy[row + xx];
                    sxy += ixy[row + xx];
                }
            }
            let det = sxx * syy - sxy * sxy;
            let trace = sxx + syy;
            response[y * wi + x] = det - k * trace * trace;
        }
    }
    response
}

/// Strict local maximum; ties go to the earlier pixel in raster order.
fn is_local_max(response: &[f32], w: u32, h: u32, x: u32, y: u32, radius: u32) -> bool {
    let idx = (y * w + x) as usize;
    let r = response[idx];
    let y0 = y.saturating_sub(radius);
    let y1 = (y + radius).min(h - 1);
    let x0 = x.saturating_sub(radius);
    let x1 = (x + radius).min(w - 1);
    for yy in y0..=y1 {
        for xx in x0..=x1 {
            let n_idx = (yy * w + xx) as usize;
            if n_idx == idx {
                continue;
            }
            let n = response[n_idx];
            if n > r || (n == r && n_idx < idx) {
                return false;
            }
        }
    }
    true
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
