//! Caller-facing engine tying the pure components to an [`IndexStore`].
//!
//! Adding an image under a path that is already indexed supersedes the old
//! records: the new record is inserted first and the old ones are deleted
//! afterwards. The two steps are not atomic. Readers may briefly see both
//! records, and a failed cleanup leaves the old record in place until the
//! next add or delete for that path.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, OrientationStrategy};
use crate::error::{Error, Result};
use crate::index::{IndexStore, Metadata, NewRecord, RecordId};
use crate::orientation::{Orientation, OrientationExpander};
use crate::raster::GrayImage;
use crate::search::{RetrievalOrchestrator, SearchOutcome};
use crate::signature::{Signature, SignatureGenerator};
use crate::similarity::DistanceEvaluator;
use crate::words::{WordExtractor, WordQuery};

/// Result of an add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOutcome {
    pub id: RecordId,
    /// Older records for the same path that were removed.
    pub superseded: Vec<RecordId>,
    /// Older records whose delete failed; they remain visible.
    pub cleanup_failures: Vec<RecordId>,
}

/// Direct comparison of two images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub distance: f64,
    pub similarity_percent: f64,
}

/// Image similarity engine over a store `S`.
///
/// # Examples
///
/// ```
/// use imagesig_retrieval::{EngineConfig, GrayImage, ImageEngine, MemoryStore};
///
/// let engine = ImageEngine::new(EngineConfig::default(), MemoryStore::new()).unwrap();
/// let image = GrayImage::from_fn(64, 48, |x, y| ((x * 7 + y * 13) % 256) as u8).unwrap();
///
/// engine.add_image("/cat.png", &image, None).unwrap();
/// let outcome = engine.search_image(&image, Some(false)).unwrap();
/// assert_eq!(outcome.matches[0].path, "/cat.png");
/// ```
#[derive(Debug)]
pub struct ImageEngine<S> {
    config: EngineConfig,
    generator: SignatureGenerator,
    extractor: WordExtractor,
    expander: OrientationExpander,
    evaluator: DistanceEvaluator,
    orchestrator: RetrievalOrchestrator,
    store: S,
}

impl<S: IndexStore> ImageEngine<S> {
    pub fn new(config: EngineConfig, store: S) -> Result<Self> {
        let generator = SignatureGenerator::new(&config)?;
        let extractor = WordExtractor::new(config.words.clone(), config.signature.signature_len())?;
        let expander = OrientationExpander::new(&config);
        let evaluator = DistanceEvaluator::new(&config);
        let orchestrator = RetrievalOrchestrator::new(&config)?;
        info!(
            config_id = %config.config_id(),
            strategy = ?config.orientation_strategy,
            "image engine ready"
        );
        Ok(Self {
            config,
            generator,
            extractor,
            expander,
            evaluator,
            orchestrator,
            store,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Identity-orientation signature of `image`.
    pub fn signature(&self, image: &GrayImage) -> Result<Signature> {
        self.generator.generate(image, Orientation::Identity)
    }

    /// Index `image` under `path`, superseding earlier records for `path`.
    pub fn add_image(
        &self,
        path: &str,
        image: &GrayImage,
        metadata: Option<Metadata>,
    ) -> Result<AddOutcome> {
        let signature = self.signature(image)?;
        self.add_signature(path, signature, metadata)
    }

    /// Index a precomputed signature under `path`.
    pub fn add_signature(
        &self,
        path: &str,
        signature: Signature,
        metadata: Option<Metadata>,
    ) -> Result<AddOutcome> {
        if signature.config_id() != self.generator.config_id() {
            return Err(Error::ConfigurationMismatch {
                expected: self.generator.config_id().to_string(),
                found: signature.config_id().to_string(),
            });
        }
        let words = self.record_words(&signature)?;

        let previous = self.store.query_by_path_exact(path)?;
        let id = self.store.insert(NewRecord {
            path: path.to_string(),
            signature,
            words,
            metadata,
        })?;

        let mut superseded = Vec::new();
        let mut cleanup_failures = Vec::new();
        for old in previous.into_iter().filter(|&old| old != id) {
            match self.store.delete(old) {
                Ok(()) => superseded.push(old),
                Err(err) => {
                    warn!(path, id = %old, error = %err, "failed to delete superseded record");
                    cleanup_failures.push(old);
                }
            }
        }
        debug!(path, %id, superseded = superseded.len(), "indexed image");

        Ok(AddOutcome {
            id,
            superseded,
            cleanup_failures,
        })
    }

    /// Words stored with a record; write-time expansion indexes every
    /// orientation.
    fn record_words(&self, signature: &Signature) -> Result<WordQuery> {
        match self.config.orientation_strategy {
            OrientationStrategy::QueryTime => self.extractor.query_for(signature),
            OrientationStrategy::WriteTime => {
                let mut words = WordQuery::default();
                for (_, oriented) in self.expander.expand_query(signature)? {
                    words.merge(self.extractor.query_for(&oriented)?);
                }
                Ok(words)
            }
        }
    }

    /// Delete every record stored under `path`; returns how many were removed.
    pub fn delete_path(&self, path: &str) -> Result<usize> {
        let ids = self.store.query_by_path_exact(path)?;
        for &id in &ids {
            self.store.delete(id)?;
        }
        debug!(path, deleted = ids.len(), "deleted path");
        Ok(ids.len())
    }

    /// Delete one record. Unknown ids are not an error.
    pub fn delete_id(&self, id: RecordId) -> Result<()> {
        self.store.delete(id)
    }

    pub fn count(&self) -> Result<usize> {
        self.store.count()
    }

    /// Stored paths in store order.
    pub fn list(&self, offset: usize, limit: usize) -> Result<Vec<String>> {
        self.store.query_page(offset, limit)
    }

    /// Search for images similar to `image`.
    ///
    /// `all_orientations` falls back to
    /// [`EngineConfig::default_all_orientations`] when `None`.
    pub fn search_image(
        &self,
        image: &GrayImage,
        all_orientations: Option<bool>,
    ) -> Result<SearchOutcome> {
        let signature = self.signature(image)?;
        self.search_signature(&signature, all_orientations)
    }

    pub fn search_signature(
        &self,
        signature: &Signature,
        all_orientations: Option<bool>,
    ) -> Result<SearchOutcome> {
        let all = all_orientations.unwrap_or(self.config.default_all_orientations);
        self.orchestrator.search(&self.store, signature, all)
    }

    /// Distance between two images, without touching the store.
    pub fn compare(&self, a: &GrayImage, b: &GrayImage) -> Result<Comparison> {
        let distance = self
            .evaluator
            .distance(&self.signature(a)?, &self.signature(b)?)?;
        Ok(Comparison {
            distance,
            similarity_percent: (1.0 - distance) * 100.0,
        })
    }

    /// Check that the store answers and holds records this engine can read.
    pub fn ping(&self) -> Result<()> {
        self.store.count()?;
        self.orchestrator.ensure_store_layout(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryStore;

    fn image(seed: usize) -> GrayImage {
        GrayImage::from_fn(80, 60, |x, y| ((x * x * seed + y * 31 + x * y) % 256) as u8).unwrap()
    }

    fn engine(config: EngineConfig) -> ImageEngine<MemoryStore> {
        ImageEngine::new(config, MemoryStore::new()).unwrap()
    }

    #[test]
    fn add_supersedes_previous_path() {
        let engine = engine(EngineConfig::default());
        let first = engine.add_image("/a.jpg", &image(3), None).unwrap();
        let second = engine.add_image("/a.jpg", &image(5), None).unwrap();
        assert_eq!(second.superseded, vec![first.id]);
        assert!(second.cleanup_failures.is_empty());
        assert_eq!(engine.count().unwrap(), 1);
    }

    #[test]
    fn compare_identical_is_zero() {
        let engine = engine(EngineConfig::default());
        let c = engine.compare(&image(3), &image(3)).unwrap();
        assert_eq!(c.distance, 0.0);
        assert_eq!(c.similarity_percent, 100.0);
    }

    #[test]
    fn write_time_records_hold_more_words() {
        let query_time = engine(EngineConfig::default());
        let write_time = engine(EngineConfig {
            orientation_strategy: OrientationStrategy::WriteTime,
            ..EngineConfig::default()
        });
        let sig = query_time.signature(&image(3)).unwrap();
        let plain = query_time.record_words(&sig).unwrap();
        let expanded = write_time.record_words(&sig).unwrap();
        assert!(expanded.word_count() > plain.word_count());
    }

    #[test]
    fn delete_path_counts_records() {
        let engine = engine(EngineConfig::default());
        engine.add_image("/a.jpg", &image(3), None).unwrap();
        engine.add_image("/b.jpg", &image(5), None).unwrap();
        assert_eq!(engine.delete_path("/a.jpg").unwrap(), 1);
        assert_eq!(engine.delete_path("/a.jpg").unwrap(), 0);
        assert_eq!(engine.list(0, 10).unwrap(), vec!["/b.jpg".to_string()]);
    }

    #[test]
    fn ping_reaches_store() {
        assert!(engine(EngineConfig::default()).ping().is_ok());
    }

    #[test]
    fn ping_rejects_store_written_with_other_layout() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let writer = ImageEngine::new(EngineConfig::default(), store.clone()).unwrap();
        writer.add_image("/a.jpg", &image(3), None).unwrap();
        let reader = ImageEngine::new(
            EngineConfig {
                orientation_strategy: OrientationStrategy::WriteTime,
                ..EngineConfig::default()
            },
            store,
        )
        .unwrap();
        assert!(writer.ping().is_ok());
        assert!(matches!(
            reader.ping().unwrap_err(),
            Error::ConfigurationMismatch { .. }
        ));
    }
}
