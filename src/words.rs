//! Index words: exact-match keys derived from signature sub-ranges.
//!
//! Each of the `sub_ranges` windows of a signature is letterized three ways:
//! as-is ("normal"), with zeros promoted to `+` ("max"), and with zeros
//! promoted to `-` ("min"). Near-duplicate noise mostly flips elements
//! between zero and a small magnitude, so the promoted variants keep such
//! images colliding on at least one word without the store having to support
//! approximate lookups.
//!
//! Words carry their sub-range index as a prefix and live in a per-range
//! field (`word_07`), so equal letter strings at different positions never
//! collide.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{Alphabet, WordConfig};
use crate::error::{Error, Result};
use crate::signature::Signature;

/// Letters for element values `-2..=2`.
const LETTERS: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

/// Store field holding the words of sub-range `index`.
pub fn field_name(index: usize) -> String {
    format!("word_{index:02}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordVariant {
    Normal,
    Max,
    Min,
}

/// One exact-match key, e.g. `07:CDDBC...`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexWord(String);

impl IndexWord {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three words of one sub-range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordSet {
    pub normal: IndexWord,
    pub max: IndexWord,
    pub min: IndexWord,
}

impl WordSet {
    pub fn get(&self, variant: WordVariant) -> &IndexWord {
        match variant {
            WordVariant::Normal => &self.normal,
            WordVariant::Max => &self.max,
            WordVariant::Min => &self.min,
        }
    }

    /// Distinct words; a sub-range without zeros yields a single word.
    pub fn distinct(&self) -> BTreeSet<IndexWord> {
        [&self.normal, &self.max, &self.min]
            .into_iter()
            .cloned()
            .collect()
    }
}

/// Pure word extractor for one word layout.
#[derive(Clone, Debug)]
pub struct WordExtractor {
    config: WordConfig,
    signature_len: usize,
}

impl WordExtractor {
    pub fn new(config: WordConfig, signature_len: usize) -> Result<Self> {
        config.validate(signature_len)?;
        Ok(Self {
            config,
            signature_len,
        })
    }

    pub fn config(&self) -> &WordConfig {
        &self.config
    }

    /// First signature element of every sub-range.
    pub fn positions(&self) -> Vec<usize> {
        (0..self.config.sub_ranges)
            .map(|i| i * self.signature_len / self.config.sub_ranges)
            .collect()
    }

    /// Words of every sub-range, keyed by sub-range index.
    pub fn extract_words(&self, signature: &Signature) -> Result<BTreeMap<usize, WordSet>> {
        if signature.len() != self.signature_len {
            return Err(Error::ConfigurationMismatch {
                expected: format!("signature length {}", self.signature_len),
                found: format!("signature length {}", signature.len()),
            });
        }
        let values = signature.values();
        Ok(self
            .positions()
            .into_iter()
            .enumerate()
            .map(|(index, pos)| {
                let end = (pos + self.config.word_length).min(values.len());
                let window = &values[pos..end];
                let set = WordSet {
                    normal: self.word(index, window, WordVariant::Normal),
                    max: self.word(index, window, WordVariant::Max),
                    min: self.word(index, window, WordVariant::Min),
                };
                (index, set)
            })
            .collect())
    }

    /// Exact-match query covering every word of `signature`.
    pub fn query_for(&self, signature: &Signature) -> Result<WordQuery> {
        let mut query = WordQuery::default();
        query.add_words(&self.extract_words(signature)?);
        Ok(query)
    }

    fn word(&self, index: usize, window: &[i8], variant: WordVariant) -> IndexWord {
        let clip = match self.config.alphabet {
            Alphabet::Ternary => 1,
            Alphabet::Quinary => 2,
        };
        let mut text = String::with_capacity(3 + self.config.word_length);
        text.push_str(&format!("{index:02}:"));
        for &value in window {
            let value = match (value, variant) {
                (0, WordVariant::Max) => 1,
                (0, WordVariant::Min) => -1,
                (v, _) => v.clamp(-clip, clip),
            };
            text.push(LETTERS[(value + 2) as usize]);
        }
        // Pad words running past the end of the signature with zeros.
        for _ in window.len()..self.config.word_length {
            text.push(LETTERS[2]);
        }
        IndexWord(text)
    }
}

/// Words grouped by store field; a record matches when it holds any of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordQuery {
    fields: BTreeMap<String, BTreeSet<IndexWord>>,
}

impl WordQuery {
    pub fn add_words(&mut self, words: &BTreeMap<usize, WordSet>) {
        for (&index, set) in words {
            self.fields
                .entry(field_name(index))
                .or_default()
                .extend(set.distinct());
        }
    }

    pub fn merge(&mut self, other: WordQuery) {
        for (field, words) in other.fields {
            self.fields.entry(field).or_default().extend(words);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &BTreeSet<IndexWord>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn word_count(&self) -> usize {
        self.fields.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether `self` and `other` share at least one word in the same field.
    pub fn intersects(&self, other: &WordQuery) -> bool {
        self.fields.iter().any(|(field, words)| {
            other
                .fields
                .get(field)
                .is_some_and(|theirs| !words.is_disjoint(theirs))
        })
    }
}
