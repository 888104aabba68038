//! Retrieval orchestration: word-based candidate generation followed by
//! exact re-ranking.
//!
//! A search runs in two stages:
//! 1. Candidate generation. The query signature, or each of its oriented
//!    variants, is turned into an OR word query and sent to the store.
//! 2. Re-ranking. Candidates are deduplicated by record id and scored with
//!    the exact distance. A record's distance is the minimum over all query
//!    variants, so a record stored upside down still scores near zero.
//!
//! Orientation queries and re-ranking run on the rayon pool when
//! [`SearchConfig::parallel`] is set.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{
    ConfigId, EngineConfig, OrientationStrategy, PartialFailurePolicy, SearchConfig,
};
use crate::error::{Error, Result};
use crate::index::{Candidate, IndexStore, Metadata, RecordId};
use crate::orientation::{OrientationExpander, OrientedVariant};
use crate::signature::Signature;
use crate::similarity::DistanceEvaluator;
use crate::words::{WordExtractor, WordQuery};

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: RecordId,
    pub path: String,
    /// Normalized distance in `[0, 1]`, 0 for identical signatures.
    pub distance: f64,
    pub metadata: Option<Metadata>,
    /// Transform of the query that best aligns it with the stored image.
    pub orientation: OrientedVariant,
    /// Words shared with the query that retrieved the record.
    pub word_hits: usize,
}

impl Match {
    /// Distance expressed as a percentage similarity.
    pub fn similarity_percent(&self) -> f64 {
        (1.0 - self.distance) * 100.0
    }
}

/// Query statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    /// Word queries sent to the store
    pub orientation_queries: usize,
    /// Word queries that returned successfully
    pub queries_answered: usize,
    /// Candidates returned before deduplication
    pub total_candidates: usize,
    /// Candidates after deduplication by record id
    pub unique_candidates: usize,
    /// Query time in milliseconds
    pub query_time_ms: u64,
}

/// Result of one search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Most similar first.
    pub matches: Vec<Match>,
    pub stats: QueryStats,
    /// Set when some orientation queries failed under
    /// [`PartialFailurePolicy::Degrade`].
    pub degraded: bool,
    pub failed_orientations: Vec<OrientedVariant>,
}

/// Stateless two-stage search over any [`IndexStore`].
#[derive(Clone, Debug)]
pub struct RetrievalOrchestrator {
    config: SearchConfig,
    strategy: OrientationStrategy,
    config_id: ConfigId,
    extractor: WordExtractor,
    expander: OrientationExpander,
    evaluator: DistanceEvaluator,
}

impl RetrievalOrchestrator {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.search.clone(),
            strategy: config.orientation_strategy,
            config_id: config.config_id(),
            extractor: WordExtractor::new(config.words.clone(), config.signature.signature_len())?,
            expander: OrientationExpander::new(config),
            evaluator: DistanceEvaluator::new(config),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search `store` for records similar to `query`.
    ///
    /// # Arguments
    /// * `store` - Index store holding the corpus
    /// * `query` - Identity-orientation signature of the query image
    /// * `all_orientations` - Also match rotated and mirrored copies
    ///
    /// # Returns
    /// Matches sorted by ascending distance, ties broken by record id. An
    /// empty corpus, or a query sharing no word with any record, yields no
    /// matches rather than an error.
    pub fn search<S>(
        &self,
        store: &S,
        query: &Signature,
        all_orientations: bool,
    ) -> Result<SearchOutcome>
    where
        S: IndexStore + ?Sized,
    {
        let start = Instant::now();
        if query.config_id() != &self.config_id {
            return Err(Error::ConfigurationMismatch {
                expected: self.config_id.to_string(),
                found: query.config_id().to_string(),
            });
        }

        // Write-time expansion stores every orientation's words, so the
        // identity query already reaches rotated records.
        let variants = if all_orientations && self.strategy == OrientationStrategy::QueryTime {
            self.expander.expand_query(query)?
        } else {
            vec![(OrientedVariant::IDENTITY, query.clone())]
        };
        let word_queries = variants
            .iter()
            .map(|(variant, signature)| Ok((*variant, self.extractor.query_for(signature)?)))
            .collect::<Result<Vec<(OrientedVariant, WordQuery)>>>()?;

        let limit = self.config.max_candidates_per_query;
        let run = |(variant, words): &(OrientedVariant, WordQuery)| {
            (*variant, store.query_by_words(words, limit))
        };
        let responses: Vec<(OrientedVariant, Result<Vec<Candidate>>)> = if self.config.parallel {
            word_queries.par_iter().map(run).collect()
        } else {
            word_queries.iter().map(run).collect()
        };

        let mut stats = QueryStats {
            orientation_queries: word_queries.len(),
            ..QueryStats::default()
        };
        let mut failed_orientations = Vec::new();
        let mut first_error = None;
        let mut unique: HashMap<RecordId, Candidate> = HashMap::new();

        for (variant, response) in responses {
            match response {
                Ok(candidates) => {
                    stats.queries_answered += 1;
                    stats.total_candidates += candidates.len();
                    for candidate in candidates {
                        match unique.entry(candidate.id) {
                            Entry::Occupied(mut best) => {
                                if candidate.word_hits > best.get().word_hits {
                                    best.insert(candidate);
                                }
                            }
                            Entry::Vacant(slot) => {
                                slot.insert(candidate);
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(?variant, error = %err, "orientation query failed");
                    failed_orientations.push(variant);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            let all_failed = stats.queries_answered == 0;
            if self.config.partial_failure == PartialFailurePolicy::FailSearch || all_failed {
                return Err(err);
            }
        }
        stats.unique_candidates = unique.len();
        if unique.is_empty() {
            self.ensure_store_layout(store)?;
        }

        let candidates: Vec<Candidate> = unique.into_values().collect();
        let mut matches = if self.config.parallel {
            candidates
                .par_iter()
                .map(|c| self.score(c, &variants, all_orientations))
                .collect::<Result<Vec<Match>>>()?
        } else {
            candidates
                .iter()
                .map(|c| self.score(c, &variants, all_orientations))
                .collect::<Result<Vec<Match>>>()?
        };

        if let Some(cutoff) = self.config.distance_cutoff {
            matches.retain(|m| m.distance < cutoff);
        }
        sort_matches(&mut matches);

        stats.query_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            orientation_queries = stats.orientation_queries,
            total_candidates = stats.total_candidates,
            unique_candidates = stats.unique_candidates,
            matches = matches.len(),
            elapsed_ms = stats.query_time_ms,
            "search complete"
        );

        Ok(SearchOutcome {
            matches,
            stats,
            degraded: !failed_orientations.is_empty(),
            failed_orientations,
        })
    }

    /// Fail when the store holds records written under another configuration.
    ///
    /// Candidates are checked one by one during re-ranking, but a reader
    /// expecting a different word layout may retrieve no candidate at all.
    pub fn ensure_store_layout<S>(&self, store: &S) -> Result<()>
    where
        S: IndexStore + ?Sized,
    {
        match store.stored_config_id()? {
            Some(found) if found != self.config_id => Err(Error::ConfigurationMismatch {
                expected: self.config_id.to_string(),
                found: found.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Exact distance of one candidate, minimized over the query variants.
    fn score(
        &self,
        candidate: &Candidate,
        variants: &[(OrientedVariant, Signature)],
        all_orientations: bool,
    ) -> Result<Match> {
        let mut best = (f64::INFINITY, OrientedVariant::IDENTITY);

        if self.strategy == OrientationStrategy::WriteTime && all_orientations {
            // Rotate the stored signature into the query's frame instead.
            let query = &variants[0].1;
            for (variant, stored) in self.expander.expand_query(&candidate.signature)? {
                let d = self.evaluator.distance(query, &stored)?;
                if d < best.0 {
                    best = (d, variant.inverse());
                }
            }
        } else {
            for (variant, query) in variants {
                let d = self.evaluator.distance(query, &candidate.signature)?;
                if d < best.0 {
                    best = (d, *variant);
                }
            }
        }

        Ok(Match {
            id: candidate.id,
            path: candidate.path.clone(),
            distance: best.0,
            metadata: candidate.metadata.clone(),
            orientation: best.1,
            word_hits: candidate.word_hits,
        })
    }
}

/// Ascending distance, then most shared words, then ascending record id.
pub fn sort_matches(matches: &mut [Match]) {
    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.word_hits.cmp(&a.word_hits))
            .then_with(|| a.id.cmp(&b.id))
    });
}
