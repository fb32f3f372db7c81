//! Planar homography estimation: normalised DLT inside a seeded RANSAC loop.
//!
//! `H` maps source points to destination points in homogeneous coordinates:
//!
//! ```text
//! s · [u v 1]ᵀ = H · [x y 1]ᵀ
//! ```
//!
//! The RANSAC random generator is seeded from the configuration so the same
//! correspondences always produce the same model.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, SymmetricEigen};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Minimum number of correspondences for a homography.
pub const HOMOGRAPHY_MIN_POINTS: usize = 4;

/// Configuration for homography RANSAC.
#[derive(Debug, Clone)]
pub struct HomographyRansacConfig {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Inlier threshold on the transfer error, in destination pixels.
    pub reprojection_threshold_px: f64,
    /// Probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// Minimum number of inliers for the model to be accepted.
    pub min_inliers: usize,
    /// Seed of the sampling RNG.
    pub seed: u64,
}

impl Default for HomographyRansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            reprojection_threshold_px: 3.0,
            confidence: 0.995,
            min_inliers: HOMOGRAPHY_MIN_POINTS,
            seed: 0x5eed,
        }
    }
}

/// Result of homography RANSAC.
#[derive(Debug, Clone)]
pub struct HomographyResult {
    /// Homography normalised so that `h33 = 1` (or unit Frobenius norm).
    pub homography: Matrix3<f64>,
    /// Inlier flag per correspondence.
    pub inlier_mask: Vec<bool>,
    pub num_inliers: usize,
}

/// Estimate a homography from exactly or more than four correspondences using
/// the normalised direct linear transform.
///
/// Returns `None` for fewer than four points, mismatched inputs or degenerate
/// (e.g. collinear) configurations.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if src.len() < HOMOGRAPHY_MIN_POINTS || src.len() != dst.len() {
        return None;
    }

    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    // Accumulate AᵀA directly; its smallest eigenvector is the null vector of A.
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (p, q) in src.iter().zip(dst.iter()) {
        let p = apply(&t_src, p)?;
        let q = apply(&t_dst, q)?;
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);

        let a1 = SVector::<f64, 9>::from_column_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        let a2 = SVector::<f64, 9>::from_column_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
        ata += a1 * a1.transpose() + a2 * a2.transpose();
    }

    let eigen = SymmetricEigen::new(ata);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse()?;
    let homography = t_dst_inv * h_norm * t_src;
    normalize_homography(homography)
}

/// Robust homography estimation with RANSAC followed by a refit on all
/// inliers.
pub fn find_homography_ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    config: &HomographyRansacConfig,
) -> Option<HomographyResult> {
    let n = src.len();
    if n < HOMOGRAPHY_MIN_POINTS || n != dst.len() {
        return None;
    }
    let min_inliers = config.min_inliers.max(HOMOGRAPHY_MIN_POINTS);
    if n < min_inliers {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<HomographyResult> = None;
    let mut max_iter = config.max_iterations.max(1);
    let mut iteration = 0;

    while iteration < max_iter {
        iteration += 1;

        let sample = index::sample(&mut rng, n, HOMOGRAPHY_MIN_POINTS).into_vec();
        let s_src: Vec<_> = sample.iter().map(|&i| src[i]).collect();
        let s_dst: Vec<_> = sample.iter().map(|&i| dst[i]).collect();

        if is_degenerate_sample(&s_src) || is_degenerate_sample(&s_dst) {
            continue;
        }

        let homography = match estimate_homography(&s_src, &s_dst) {
            Some(h) => h,
            None => continue,
        };

        let inlier_mask = find_inliers(&homography, src, dst, config.reprojection_threshold_px);
        let num_inliers = inlier_mask.iter().filter(|&&m| m).count();

        if best.as_ref().map_or(true, |b| num_inliers > b.num_inliers) {
            best = Some(HomographyResult {
                homography,
                inlier_mask,
                num_inliers,
            });

            let inlier_ratio = num_inliers as f64 / n as f64;
            let adaptive =
                compute_adaptive_iterations(inlier_ratio, config.confidence, HOMOGRAPHY_MIN_POINTS);
            max_iter = max_iter.min(iteration.saturating_add(adaptive));
        }
    }

    let mut result = best?;

    // Refit on all inliers and keep the refit if it does not lose support.
    let in_src: Vec<_> = (0..n).filter(|&i| result.inlier_mask[i]).map(|i| src[i]).collect();
    let in_dst: Vec<_> = (0..n).filter(|&i| result.inlier_mask[i]).map(|i| dst[i]).collect();
    if let Some(refined) = estimate_homography(&in_src, &in_dst) {
        let mask = find_inliers(&refined, src, dst, config.reprojection_threshold_px);
        let count = mask.iter().filter(|&&m| m).count();
        if count >= result.num_inliers {
            result = HomographyResult {
                homography: refined,
                inlier_mask: mask,
                num_inliers: count,
            };
        }
    }

    (result.num_inliers >= min_inliers).then_some(result)
}

/// Apply a homography to a point. `None` if the point maps to infinity.
pub fn project(h: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    apply(h, p)
}

/// Transfer error `|H·src - dst|` in destination pixels.
pub fn transfer_error(h: &Matrix3<f64>, src: &Point2<f64>, dst: &Point2<f64>) -> f64 {
    match apply(h, src) {
        Some(p) => (p - dst).norm(),
        None => f64::INFINITY,
    }
}

fn find_inliers(h: &Matrix3<f64>, src: &[Point2<f64>], dst: &[Point2<f64>], threshold: f64) -> Vec<bool> {
    src.iter()
        .zip(dst.iter())
        .map(|(p, q)| transfer_error(h, p, q) < threshold)
        .collect()
}

fn apply(h: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    let v = h * p.to_homogeneous();
    if v.z.abs() < 1e-12 {
        return None;
    }
    Some(Point2::new(v.x / v.z, v.y / v.z))
}

/// Hartley normalisation: centroid to origin, mean distance √2.
fn normalizing_transform(points: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 || !mean_dist.is_finite() {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn normalize_homography(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    if !h.iter().all(|v| v.is_finite()) {
        return None;
    }
    let scale = if h[(2, 2)].abs() > 1e-12 {
        h[(2, 2)]
    } else {
        h.norm()
    };
    if scale.abs() < 1e-12 {
        return None;
    }
    let h = h / scale;
    (h.determinant().abs() > 1e-12).then_some(h)
}

/// A minimal sample is degenerate if any three of its points are collinear.
fn is_degenerate_sample(points: &[Point2<f64>]) -> bool {
    const MIN_TRIANGLE_AREA: f64 = 1e-6;
    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let a = points[j] - points[i];
                let b = points[k] - points[i];
                if (a.x * b.y - a.y * b.x).abs() * 0.5 < MIN_TRIANGLE_AREA {
                    return true;
                }
            }
        }
    }
    false
}

/// Compute adaptive number of RANSAC iterations.
fn compute_adaptive_iterations(inlier_ratio: f64, probability: f64, sample_size: usize) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }

    // k = log(1 - p) / log(1 - w^n)
    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_denom = (1.0 - w_n).ln();

    if log_denom.abs() < 1e-10 {
        return usize::MAX;
    }

    let k = (1.0 - probability).ln() / log_denom;
    (k.ceil() as usize).max(1)
}
