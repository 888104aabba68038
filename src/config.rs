//! Configuration values threaded through every component.
//!
//! Nothing here is process-wide state: each component receives the config it
//! needs by reference. The fields that change the shape or meaning of a
//! signature are summarised by [`ConfigId`], which travels with every
//! signature and stored record so mismatched writers and readers are detected
//! instead of silently producing meaningless distances.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Environment variable overriding [`EngineConfig::default_all_orientations`].
pub const ENV_ALL_ORIENTATIONS: &str = "IMAGESIG_ALL_ORIENTATIONS";
/// Environment variable overriding [`SearchConfig::max_candidates_per_query`].
pub const ENV_MAX_CANDIDATES: &str = "IMAGESIG_MAX_CANDIDATES";
/// Environment variable overriding [`SearchConfig::distance_cutoff`].
pub const ENV_DISTANCE_CUTOFF: &str = "IMAGESIG_DISTANCE_CUTOFF";
/// Environment variable overriding [`EngineConfig::orientation_strategy`].
pub const ENV_ORIENTATION_STRATEGY: &str = "IMAGESIG_ORIENTATION_STRATEGY";

/// Signature generator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Grid points per axis.
    pub grid_size: usize,
    /// Fraction of each edge excluded before the grid is laid out.
    pub crop_fraction: f64,
    /// Differences smaller than this (in grey levels, 0..=255) count as equal.
    pub identical_tolerance: f64,
    /// Quantization levels per sign; signature values lie in `[-n_levels, n_levels]`.
    pub n_levels: u8,
    /// Also compare each grid point with the points two steps away on both axes.
    pub far_neighbors: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            grid_size: 9,
            crop_fraction: 0.05,
            identical_tolerance: 2.0,
            n_levels: 2,
            far_neighbors: false,
        }
    }
}

impl SignatureConfig {
    /// Comparisons recorded per grid point.
    pub fn directions(&self) -> usize {
        if self.far_neighbors {
            12
        } else {
            8
        }
    }

    /// Signature length `N`.
    pub fn signature_len(&self) -> usize {
        self.grid_size * self.grid_size * self.directions()
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_size < 2 {
            return Err(Error::configuration("grid_size must be at least 2"));
        }
        if !(0.0..0.5).contains(&self.crop_fraction) {
            return Err(Error::configuration("crop_fraction must be in [0, 0.5)"));
        }
        if !self.identical_tolerance.is_finite() || self.identical_tolerance < 0.0 {
            return Err(Error::configuration(
                "identical_tolerance must be a non-negative finite number",
            ));
        }
        if self.n_levels == 0 || self.n_levels > 63 {
            return Err(Error::configuration("n_levels must be in 1..=63"));
        }
        Ok(())
    }
}

/// Letter alphabet used when turning signature elements into index words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alphabet {
    /// Sign only: `-`, `0`, `+`.
    #[default]
    Ternary,
    /// Sign and magnitude: `--`, `-`, `0`, `+`, `++`.
    Quinary,
}

/// Word extractor parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordConfig {
    /// Number of sub-ranges (and therefore word fields) per signature.
    pub sub_ranges: usize,
    /// Signature elements per word.
    pub word_length: usize,
    pub alphabet: Alphabet,
}

impl Default for WordConfig {
    fn default() -> Self {
        Self {
            sub_ranges: 40,
            word_length: 16,
            alphabet: Alphabet::Ternary,
        }
    }
}

impl WordConfig {
    /// Check the word layout against a signature of `signature_len` elements.
    pub fn validate(&self, signature_len: usize) -> Result<()> {
        if self.sub_ranges == 0 || self.word_length == 0 {
            return Err(Error::configuration(
                "sub_ranges and word_length must be non-zero",
            ));
        }
        if self.sub_ranges > signature_len {
            return Err(Error::configuration(format!(
                "sub_ranges ({}) exceeds signature length ({})",
                self.sub_ranges, signature_len
            )));
        }
        if self.word_length > signature_len {
            return Err(Error::configuration(format!(
                "word_length ({}) exceeds signature length ({})",
                self.word_length, signature_len
            )));
        }
        if self.sub_ranges > 100 {
            return Err(Error::configuration("sub_ranges must be at most 100"));
        }
        Ok(())
    }
}

/// Norm used by the distance evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceNorm {
    /// Sum of absolute differences over the maximum possible sum.
    L1,
    /// Euclidean distance over the maximum possible Euclidean distance.
    #[default]
    L2,
    /// `|a - b| / (|a| + |b|)`, scale-free but sensitive to sparse signatures.
    Relative,
}

/// Where orientation invariance is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrientationStrategy {
    /// Store identity words only; expand the query into every orientation.
    #[default]
    QueryTime,
    /// Store the words of every orientation; query with identity words only.
    WriteTime,
}

/// What a search does when some orientation queries fail and others succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartialFailurePolicy {
    /// Any failed orientation query fails the whole search.
    #[default]
    FailSearch,
    /// Rank whatever the successful queries returned and flag the outcome as degraded.
    Degrade,
}

/// Retrieval orchestrator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Upper bound on candidates fetched per orientation query.
    pub max_candidates_per_query: usize,
    /// Drop matches whose distance is at or above this value.
    pub distance_cutoff: Option<f64>,
    /// Dispatch orientation queries and re-ranking on the rayon pool.
    pub parallel: bool,
    pub partial_failure: PartialFailurePolicy,
}

impl SearchConfig {
    /// Conservative cutoff for near-duplicate match lists.
    pub const STRICT_CUTOFF: f64 = 0.45;

    pub fn validate(&self) -> Result<()> {
        if self.max_candidates_per_query == 0 {
            return Err(Error::configuration(
                "max_candidates_per_query must be non-zero",
            ));
        }
        if let Some(cutoff) = self.distance_cutoff {
            if !(cutoff > 0.0 && cutoff <= 1.0) {
                return Err(Error::configuration("distance_cutoff must be in (0, 1]"));
            }
        }
        Ok(())
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_candidates_per_query: 100,
            distance_cutoff: None,
            parallel: true,
            partial_failure: PartialFailurePolicy::FailSearch,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub signature: SignatureConfig,
    pub words: WordConfig,
    pub norm: DistanceNorm,
    pub orientation_strategy: OrientationStrategy,
    /// Include the intensity-inverted variant of every orientation.
    pub include_inversions: bool,
    /// Used by searches that do not state whether orientations are wanted.
    pub default_all_orientations: bool,
    pub search: SearchConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.signature.validate()?;
        self.words.validate(self.signature.signature_len())?;
        self.search.validate()
    }

    /// Identifier of the parameters that determine signatures and stored words.
    pub fn config_id(&self) -> ConfigId {
        ConfigId::derive(&self.signature, &self.words, self.stored_words())
    }

    /// Variants whose words each stored record is indexed under.
    pub fn stored_words(&self) -> StoredWords {
        match self.orientation_strategy {
            OrientationStrategy::QueryTime => StoredWords::Identity,
            OrientationStrategy::WriteTime => StoredWords::AllOrientations {
                inversions: self.include_inversions,
            },
        }
    }

    /// Default configuration with overrides taken from the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ALL_ORIENTATIONS) {
            self.default_all_orientations = parse_bool(ENV_ALL_ORIENTATIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CANDIDATES) {
            self.search.max_candidates_per_query = value.trim().parse().map_err(|_| {
                Error::configuration(format!("{ENV_MAX_CANDIDATES}: not an integer: {value}"))
            })?;
        }
        if let Some(value) = lookup(ENV_DISTANCE_CUTOFF) {
            let value = value.trim();
            self.search.distance_cutoff = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.parse().map_err(|_| {
                    Error::configuration(format!("{ENV_DISTANCE_CUTOFF}: not a number: {value}"))
                })?)
            };
        }
        if let Some(value) = lookup(ENV_ORIENTATION_STRATEGY) {
            self.orientation_strategy = match value.trim().to_ascii_lowercase().as_str() {
                "query" | "query_time" => OrientationStrategy::QueryTime,
                "write" | "write_time" => OrientationStrategy::WriteTime,
                other => {
                    return Err(Error::configuration(format!(
                        "{ENV_ORIENTATION_STRATEGY}: unknown strategy {other}"
                    )))
                }
            };
        }
        self.validate()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::configuration(format!("{key}: not a boolean: {other}"))),
    }
}

/// Word layout of stored records.
///
/// A reader whose queries assume a different layout than the writer used
/// misses records without any error, so the layout is part of [`ConfigId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredWords {
    /// Identity-orientation words only.
    Identity,
    /// The union of the words of every orientation.
    AllOrientations { inversions: bool },
}

impl StoredWords {
    fn tag(self) -> &'static str {
        match self {
            StoredWords::Identity => "identity",
            StoredWords::AllOrientations { inversions: false } => "oriented",
            StoredWords::AllOrientations { inversions: true } => "oriented+inverted",
        }
    }
}

/// Short identifier of the parameters that determine signature and word layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigId(String);

impl ConfigId {
    pub fn derive(signature: &SignatureConfig, words: &WordConfig, stored: StoredWords) -> Self {
        let canonical = format!(
            "grid={};crop={:?};tol={:?};levels={};far={};sub={};len={};alphabet={:?};stored={}",
            signature.grid_size,
            signature.crop_fraction,
            signature.identical_tolerance,
            signature.n_levels,
            signature.far_neighbors,
            words.sub_ranges,
            words.word_length,
            words.alphabet,
            stored.tag(),
        );
        let digest = Sha256::digest(canonical.as_bytes());
        let hex = digest[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_signature_has_648_elements() {
        let config = EngineConfig::default();
        assert_eq!(config.signature.signature_len(), 648);
        config.validate().unwrap();
    }

    #[test]
    fn far_neighbors_extend_signature() {
        let sig = SignatureConfig {
            far_neighbors: true,
            ..SignatureConfig::default()
        };
        assert_eq!(sig.signature_len(), 9 * 9 * 12);
    }

    #[test]
    fn config_id_is_stable_and_sensitive() {
        let a = EngineConfig::default();
        let b = EngineConfig::default();
        assert_eq!(a.config_id(), b.config_id());
        assert_eq!(a.config_id().as_str().len(), 16);

        let mut c = EngineConfig::default();
        c.words.alphabet = Alphabet::Quinary;
        assert_ne!(a.config_id(), c.config_id());

        // Search-only knobs do not change the id.
        let mut d = EngineConfig::default();
        d.search.max_candidates_per_query = 5;
        d.norm = DistanceNorm::L1;
        d.default_all_orientations = true;
        assert_eq!(a.config_id(), d.config_id());
    }

    #[test]
    fn stored_word_layout_changes_the_id() {
        let query_time = EngineConfig::default();
        let write_time = EngineConfig {
            orientation_strategy: OrientationStrategy::WriteTime,
            ..EngineConfig::default()
        };
        let write_time_inverted = EngineConfig {
            include_inversions: true,
            ..write_time.clone()
        };
        assert_eq!(query_time.stored_words(), StoredWords::Identity);
        assert_ne!(query_time.config_id(), write_time.config_id());
        assert_ne!(write_time.config_id(), write_time_inverted.config_id());

        // Query-time expansion stores identity words whether or not
        // inversions are searched.
        let query_time_inverted = EngineConfig {
            include_inversions: true,
            ..EngineConfig::default()
        };
        assert_eq!(query_time.config_id(), query_time_inverted.config_id());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.signature.grid_size = 1;
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration { .. })
        ));

        let mut config = EngineConfig::default();
        config.words.sub_ranges = 10_000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.search.distance_cutoff = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_are_applied() {
        let vars: HashMap<&str, &str> = [
            (ENV_ALL_ORIENTATIONS, "true"),
            (ENV_MAX_CANDIDATES, "25"),
            (ENV_DISTANCE_CUTOFF, "0.45"),
            (ENV_ORIENTATION_STRATEGY, "write_time"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(config.default_all_orientations);
        assert_eq!(config.search.max_candidates_per_query, 25);
        assert_eq!(config.search.distance_cutoff, Some(0.45));
        assert_eq!(config.orientation_strategy, OrientationStrategy::WriteTime);
    }

    #[test]
    fn env_rejects_garbage() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env(|key| (key == ENV_ALL_ORIENTATIONS).then(|| "maybe".to_string()))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }
}
