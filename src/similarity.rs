//! Normalized signature distances.
//!
//! Every norm maps onto `[0, 1]`: 0 for identical signatures, 1 for the
//! largest difference the norm allows. Normalizing by the maximum possible
//! difference makes scores comparable across images of any size or aspect
//! ratio, since all signatures of one configuration share length and range.

use crate::config::{DistanceNorm, EngineConfig};
use crate::error::Result;
use crate::signature::Signature;

/// Distance evaluator bound to a norm and a signature value range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceEvaluator {
    norm: DistanceNorm,
    max_level: u8,
}

impl DistanceEvaluator {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_norm(config.norm, config.signature.n_levels)
    }

    /// `max_level` is the largest magnitude a signature element can take.
    pub fn with_norm(norm: DistanceNorm, max_level: u8) -> Self {
        Self { norm, max_level }
    }

    pub fn norm(&self) -> DistanceNorm {
        self.norm
    }

    /// Distance between two signatures of the same configuration.
    ///
    /// Fails with `ConfigurationMismatch` rather than comparing signatures
    /// produced under different configurations.
    pub fn distance(&self, a: &Signature, b: &Signature) -> Result<f64> {
        a.ensure_compatible(b)?;
        Ok(compute_distance(a.values(), b.values(), self.norm, self.max_level))
    }
}

/// Distance between raw signature values using the given norm.
///
/// # Examples
///
/// ```
/// use imagesig_retrieval::config::DistanceNorm;
/// use imagesig_retrieval::similarity::compute_distance;
///
/// let a = [0i8, 1, -2, 2];
/// assert_eq!(compute_distance(&a, &a, DistanceNorm::L2, 2), 0.0);
/// let b = [0i8, 1, 2, 2];
/// assert!(compute_distance(&a, &b, DistanceNorm::L1, 2) > 0.0);
/// ```
pub fn compute_distance(a: &[i8], b: &[i8], norm: DistanceNorm, max_level: u8) -> f64 {
    match norm {
        DistanceNorm::L1 => l1_distance(a, b, max_level),
        DistanceNorm::L2 => l2_distance(a, b, max_level),
        DistanceNorm::Relative => relative_distance(a, b),
    }
}

/// Sum of absolute differences over `len * 2 * max_level`.
pub fn l1_distance(a: &[i8], b: &[i8], max_level: u8) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 || max_level == 0 {
        return 0.0;
    }
    let sum: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs() as u64)
        .sum();
    let max = len as f64 * 2.0 * max_level as f64;
    (sum as f64 / max).min(1.0)
}

/// Euclidean distance over the Euclidean distance of two opposite extremes.
pub fn l2_distance(a: &[i8], b: &[i8], max_level: u8) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 || max_level == 0 {
        return 0.0;
    }
    let sum: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as i64 - y as i64;
            (d * d) as u64
        })
        .sum();
    let span = 2.0 * max_level as f64;
    let max = (len as f64 * span * span).sqrt();
    ((sum as f64).sqrt() / max).min(1.0)
}

/// `|a - b| / (|a| + |b|)`; two all-zero signatures are at distance 0.
pub fn relative_distance(a: &[i8], b: &[i8]) -> f64 {
    let norm = |v: &[i8]| -> f64 {
        (v.iter().map(|&x| (x as i64 * x as i64) as u64).sum::<u64>() as f64).sqrt()
    };
    let diff: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as i64 - y as i64;
            (d * d) as u64
        })
        .sum();
    let denom = norm(a) + norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    ((diff as f64).sqrt() / denom).min(1.0)
}
