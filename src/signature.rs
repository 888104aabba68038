//! Perceptual signatures from grid-sampled intensity gradients.
//!
//! A `grid_size x grid_size` lattice is laid over the cropped image, each
//! lattice point is replaced by the mean intensity of a small neighbourhood,
//! and every point is compared with its lattice neighbours. The signed
//! differences are quantized per image into `[-n_levels, n_levels]` and
//! flattened point-major, direction-minor.
//!
//! Neighbourhood bounds are computed with floor/ceil in exact integer
//! arithmetic and the crop margin is the same on both sides of an axis, so
//! rotating or mirroring the raster permutes the sampled means exactly. The
//! signature of an oriented raster is therefore identical to the oriented
//! signature of the original (see [`crate::orientation`]).

use serde::{Deserialize, Serialize};

use crate::config::{ConfigId, EngineConfig, SignatureConfig};
use crate::error::{Error, Result};
use crate::orientation::Orientation;
use crate::raster::GrayImage;

/// Lattice offsets `(d_row, d_col)` in signature order.
///
/// The first eight are the immediate neighbours in row-major order; the last
/// four are only used with `far_neighbors`.
pub(crate) const DIRECTIONS: [(i32, i32); 12] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
    (-2, 0),
    (0, -2),
    (0, 2),
    (2, 0),
];

/// Fixed-length quantized gradient vector for one image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    config_id: ConfigId,
    values: Vec<i8>,
}

impl Signature {
    /// Reassemble a signature, e.g. from a stored record.
    pub fn from_parts(config_id: ConfigId, values: Vec<i8>) -> Self {
        Self { config_id, values }
    }

    pub fn values(&self) -> &[i8] {
        &self.values
    }

    pub fn config_id(&self) -> &ConfigId {
        &self.config_id
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Signature of the intensity-inverted image.
    pub fn negated(&self) -> Self {
        Self {
            config_id: self.config_id.clone(),
            values: self.values.iter().map(|v| -v).collect(),
        }
    }

    /// Fail unless `other` was produced under the same configuration.
    pub fn ensure_compatible(&self, other: &Signature) -> Result<()> {
        if self.config_id != other.config_id {
            return Err(Error::ConfigurationMismatch {
                expected: self.config_id.to_string(),
                found: other.config_id.to_string(),
            });
        }
        if self.values.len() != other.values.len() {
            return Err(Error::ConfigurationMismatch {
                expected: format!("signature length {}", self.values.len()),
                found: format!("signature length {}", other.values.len()),
            });
        }
        Ok(())
    }

    pub(crate) fn with_values(&self, values: Vec<i8>) -> Self {
        Self {
            config_id: self.config_id.clone(),
            values,
        }
    }
}

/// Stateless signature generator bound to one configuration.
#[derive(Clone, Debug)]
pub struct SignatureGenerator {
    config: SignatureConfig,
    config_id: ConfigId,
}

impl SignatureGenerator {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.signature.clone(),
            config_id: config.config_id(),
        })
    }

    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    pub fn config_id(&self) -> &ConfigId {
        &self.config_id
    }

    /// Signature of `image` viewed in `orientation`.
    pub fn generate(&self, image: &GrayImage, orientation: Orientation) -> Result<Signature> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::invalid_image("zero-area image"));
        }
        let oriented;
        let image = if orientation == Orientation::Identity {
            image
        } else {
            oriented = orientation.apply_to_image(image);
            &oriented
        };

        let grey = self.mean_levels(image);
        let mut diffs = self.differentials(&grey);
        quantize(
            &mut diffs,
            self.config.identical_tolerance,
            self.config.n_levels,
        );

        Ok(Signature {
            config_id: self.config_id.clone(),
            values: diffs.into_iter().map(|d| d as i8).collect(),
        })
    }

    /// Mean intensity around every lattice point, row-major.
    fn mean_levels(&self, image: &GrayImage) -> Vec<f64> {
        let n = self.config.grid_size;
        let side = (image.width().min(image.height()) + 10) / 20;
        let side = side.max(2);

        let cols = axis_windows(image.width(), n, side, self.config.crop_fraction);
        let rows = axis_windows(image.height(), n, side, self.config.crop_fraction);

        let mut grey = Vec::with_capacity(n * n);
        for &(y0, y1) in &rows {
            for &(x0, x1) in &cols {
                let (sum, count) = image.window_sum(x0, x1, y0, y1);
                grey.push(sum as f64 / count as f64);
            }
        }
        grey
    }

    /// `centre - neighbour` for every lattice point and direction; lattice
    /// positions outside the grid contribute 0.
    fn differentials(&self, grey: &[f64]) -> Vec<f64> {
        let n = self.config.grid_size as i32;
        let directions = &DIRECTIONS[..self.config.directions()];
        let mut out = Vec::with_capacity(grey.len() * directions.len());

        for r in 0..n {
            for c in 0..n {
                let centre = grey[(r * n + c) as usize];
                for &(dr, dc) in directions {
                    let (nr, nc) = (r + dr, c + dc);
                    if nr < 0 || nr >= n || nc < 0 || nc >= n {
                        out.push(0.0);
                    } else {
                        out.push(centre - grey[(nr * n + nc) as usize]);
                    }
                }
            }
        }
        out
    }
}

/// Pixel windows `[start, end)` around each of the `n` lattice points on an
/// axis of `len` pixels.
fn axis_windows(len: usize, n: usize, side: usize, crop_fraction: f64) -> Vec<(usize, usize)> {
    let margin = (len as f64 * crop_fraction).floor() as i64;
    let len = len as i64;
    let (lo, hi) = (margin, len - margin);
    let (n, side) = (n as i64, side as i64);

    // Centre k sits at lo + (k + 1)(hi - lo) / (n + 1); scale by 2(n + 1) to
    // stay integral.
    let den = 2 * (n + 1);
    (0..n)
        .map(|k| {
            let centre = 2 * (n + 1) * lo + 2 * (k + 1) * (hi - lo);
            let start = floor_div(centre - side * (n + 1), den).clamp(0, len);
            let end = ceil_div(centre + side * (n + 1), den).clamp(0, len);
            (start as usize, end as usize)
        })
        .collect()
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && (a < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

fn ceil_div(a: i64, b: i64) -> i64 {
    -floor_div(-a, b)
}

/// Bucket differences in place into `-n_levels..=n_levels`.
///
/// Positive and negative differences are cut separately at evenly spaced
/// percentiles of their own magnitudes, so the quantization depends only on
/// this image.
fn quantize(diffs: &mut [f64], tolerance: f64, n_levels: u8) {
    for d in diffs.iter_mut() {
        if d.abs() < tolerance {
            *d = 0.0;
        }
    }

    let mut positive: Vec<f64> = diffs.iter().copied().filter(|d| *d > 0.0).collect();
    let mut negative: Vec<f64> = diffs.iter().filter(|d| **d < 0.0).map(|d| -d).collect();
    positive.sort_by(f64::total_cmp);
    negative.sort_by(f64::total_cmp);

    let pos_cuts = interior_cutoffs(&positive, n_levels);
    let neg_cuts = interior_cutoffs(&negative, n_levels);

    for d in diffs.iter_mut() {
        if *d > 0.0 {
            *d = level(*d, &pos_cuts) as f64;
        } else if *d < 0.0 {
            *d = -(level(-*d, &neg_cuts) as f64);
        }
    }
}

fn level(magnitude: f64, cuts: &[f64]) -> u8 {
    1 + cuts.iter().filter(|&&c| magnitude >= c).count() as u8
}

/// Percentiles `100 k / n_levels` for `k = 1..n_levels` of sorted values.
fn interior_cutoffs(sorted: &[f64], n_levels: u8) -> Vec<f64> {
    if sorted.is_empty() {
        return Vec::new();
    }
    (1..n_levels)
        .map(|k| percentile(sorted, k as f64 / n_levels as f64))
        .collect()
}

/// Linearly interpolated quantile `q` in `[0, 1]` of a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> SignatureGenerator {
        SignatureGenerator::new(&EngineConfig::default()).unwrap()
    }

    fn gradient(width: usize, height: usize) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| ((x * 3 + y * 5) % 256) as u8).unwrap()
    }

    #[test]
    fn uniform_image_gives_zero_signature() {
        let img = GrayImage::from_luma8(64, 48, vec![128; 64 * 48]).unwrap();
        let sig = generator().generate(&img, Orientation::Identity).unwrap();
        assert_eq!(sig.len(), 648);
        assert!(sig.values().iter().all(|&v| v == 0));
    }

    #[test]
    fn tiny_image_still_produces_signature() {
        let img = GrayImage::from_luma8(1, 1, vec![7]).unwrap();
        let sig = generator().generate(&img, Orientation::Identity).unwrap();
        assert_eq!(sig.len(), 648);
    }

    #[test]
    fn values_stay_in_range() {
        let sig = generator()
            .generate(&gradient(120, 90), Orientation::Identity)
            .unwrap();
        assert!(sig.values().iter().all(|&v| (-2..=2).contains(&v)));
        assert!(sig.values().iter().any(|&v| v != 0));
    }

    #[test]
    fn border_directions_are_zero() {
        let sig = generator()
            .generate(&gradient(120, 90), Orientation::Identity)
            .unwrap();
        // Point (0, 0): up-left, up, up-right, left, down-left all leave the grid.
        for d in [0, 1, 2, 3, 5] {
            assert_eq!(sig.values()[d], 0);
        }
    }

    #[test]
    fn axis_windows_are_mirror_symmetric() {
        for len in [1usize, 2, 17, 100, 333] {
            let windows = axis_windows(len, 9, 5, 0.05);
            for (k, &(s, e)) in windows.iter().enumerate() {
                assert!(s < e, "empty window for len {len}");
                let (ms, me) = windows[windows.len() - 1 - k];
                assert_eq!((s, e), (len - me, len - ms));
            }
        }
    }

    #[test]
    fn percentile_interpolates() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 1.0), 4.0);
        assert!((percentile(&data, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn quantize_splits_at_median() {
        let mut diffs = vec![0.5, 10.0, 20.0, 30.0, -10.0, -40.0];
        quantize(&mut diffs, 2.0, 2);
        assert_eq!(diffs, vec![0.0, 1.0, 2.0, 2.0, -1.0, -2.0]);
    }

    #[test]
    fn incompatible_signatures_are_reported() {
        let sig = generator()
            .generate(&gradient(40, 40), Orientation::Identity)
            .unwrap();
        let mut config = EngineConfig::default();
        config.signature.grid_size = 5;
        let other_id = config.config_id();
        let other = Signature::from_parts(other_id, vec![0; 200]);
        assert!(matches!(
            sig.ensure_compatible(&other),
            Err(Error::ConfigurationMismatch { .. })
        ));
    }
}
