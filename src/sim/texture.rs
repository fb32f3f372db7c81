//! Procedural ground texture.
//!
//! Two overlapping grids of constant-intensity blocks give plenty of corners
//! at every scale the pipeline works at; a smooth value-noise layer breaks up
//! repetition. Coordinates are east/north metres.

/// Deterministic ground intensity field.
#[derive(Debug, Clone, Copy)]
pub struct GroundTexture {
    seed: u64,
    coarse_m: f64,
    fine_m: f64,
    noise_m: f64,
}

impl GroundTexture {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            coarse_m: 17.0,
            fine_m: 11.0,
            noise_m: 5.0,
        }
    }

    /// Intensity in `[0, 255]` at a ground point.
    pub fn intensity(&self, east: f64, north: f64) -> f64 {
        let coarse = self.block(east, north, self.coarse_m, 0.0, 1);
        let fine = self.block(east, north, self.fine_m, 4.3, 2);
        let noise = self.value_noise(east, north);
        (255.0 * (0.5 * coarse + 0.3 * fine + 0.2 * noise)).clamp(0.0, 255.0)
    }

    fn block(&self, east: f64, north: f64, size: f64, offset: f64, layer: u64) -> f64 {
        let ix = ((east + offset) / size).floor() as i64;
        let iy = ((north + offset) / size).floor() as i64;
        cell_value(self.seed ^ layer.wrapping_mul(0x9e37_79b9_7f4a_7c15), ix, iy)
    }

    fn value_noise(&self, east: f64, north: f64) -> f64 {
        let x = east / self.noise_m;
        let y = north / self.noise_m;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (smooth(x - x0), smooth(y - y0));
        let (ix, iy) = (x0 as i64, y0 as i64);
        let seed = self.seed ^ 0xd1b5_4a32_d192_ed03;

        let v00 = cell_value(seed, ix, iy);
        let v10 = cell_value(seed, ix + 1, iy);
        let v01 = cell_value(seed, ix, iy + 1);
        let v11 = cell_value(seed, ix + 1, iy + 1);
        let top = v00 + (v10 - v00) * fx;
        let bottom = v01 + (v11 - v01) * fx;
        top + (bottom - top) * fy
    }
}

fn smooth(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

/// Uniform value in `[0, 1)` for an integer cell (SplitMix64 finaliser).
fn cell_value(seed: u64, ix: i64, iy: i64) -> f64 {
    let mut z = seed
        .wrapping_add((ix as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
        .wrapping_add((iy as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_and_bounded() {
        let a = GroundTexture::new(7);
        let b = GroundTexture::new(7);
        for i in 0..200 {
            let (e, n) = (i as f64 * 3.7 - 300.0, i as f64 * -2.1 + 50.0);
            let v = a.intensity(e, n);
            assert_eq!(v, b.intensity(e, n));
            assert!((0.0..=255.0).contains(&v));
        }
    }

    #[test]
    fn test_seed_changes_texture() {
        let a = GroundTexture::new(1);
        let b = GroundTexture::new(2);
        let differing = (0..100)
            .filter(|i| a.intensity(*i as f64 * 7.0, 3.0) != b.intensity(*i as f64 * 7.0, 3.0))
            .count();
        assert!(differing > 50);
    }
}
