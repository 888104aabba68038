//! # imagesig-retrieval
//!
//! Perceptual image signatures with word-indexed candidate generation and
//! exact re-ranking.
//!
//! An image is reduced to a fixed-length vector of quantized grey-level
//! differences sampled on a grid ([`signature`]). Sub-ranges of that vector
//! become exact-match index words ([`words`]) so a document store can return
//! plausible candidates cheaply; candidates are then ranked by a normalized
//! distance ([`similarity`]). Rotated and mirrored copies are found by
//! permuting signatures rather than re-sampling images ([`orientation`]).
//!
//! [`ImageEngine`] wires these together over any [`IndexStore`].

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod orientation;
pub mod raster;
pub mod retry;
pub mod search;
pub mod signature;
pub mod similarity;
pub mod words;

pub use config::{
    Alphabet, ConfigId, DistanceNorm, EngineConfig, OrientationStrategy, PartialFailurePolicy,
    SearchConfig, SignatureConfig, StoredWords, WordConfig,
};
pub use engine::{AddOutcome, Comparison, ImageEngine};
pub use error::{Error, Result};
pub use index::{Candidate, IndexStore, MemoryStore, Metadata, NewRecord, RecordId, StoredRecord};
pub use orientation::{Orientation, OrientationExpander, OrientedVariant};
pub use raster::GrayImage;
pub use retry::{RetryPolicy, RetryingStore};
pub use search::{Match, QueryStats, RetrievalOrchestrator, SearchOutcome};
pub use signature::{Signature, SignatureGenerator};
pub use similarity::DistanceEvaluator;
pub use words::{IndexWord, WordExtractor, WordQuery, WordSet, WordVariant};
