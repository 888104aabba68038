//! Index store boundary and an in-memory reference store.
//!
//! The engine owns no storage. Everything it persists goes through
//! [`IndexStore`], which any searchable document store with exact-match
//! term queries can implement. [`MemoryStore`] keeps postings lists per
//! (field, word) in memory and can snapshot itself to JSON.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigId;
use crate::error::Result;
use crate::signature::Signature;
use crate::words::{IndexWord, WordQuery};

/// Identifier assigned by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied metadata, stored and returned verbatim.
pub type Metadata = serde_json::Value;

/// Fields of a record about to be inserted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub path: String,
    pub signature: Signature,
    pub words: WordQuery,
    pub metadata: Option<Metadata>,
}

/// A record as persisted by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub path: String,
    pub signature: Signature,
    pub words: WordQuery,
    pub metadata: Option<Metadata>,
}

/// A record returned by a word query, without its word fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub id: RecordId,
    pub path: String,
    pub signature: Signature,
    pub metadata: Option<Metadata>,
    /// Number of query words the record holds.
    pub word_hits: usize,
}

/// Operations the engine needs from a document store.
///
/// Implementations own timeouts and retries for their transport; errors that
/// survive them surface as `StoreUnavailable`. Reads may be issued from
/// several threads at once.
pub trait IndexStore: Send + Sync {
    /// Insert a record and return its new id.
    fn insert(&self, record: NewRecord) -> Result<RecordId>;

    /// Records holding at least one of the query's words in the same field,
    /// best-covered first, at most `limit` of them.
    fn query_by_words(&self, query: &WordQuery, limit: usize) -> Result<Vec<Candidate>>;

    /// Ids of every record stored under exactly `path`.
    fn query_by_path_exact(&self, path: &str) -> Result<Vec<RecordId>>;

    /// Delete a record; deleting an absent id succeeds.
    fn delete(&self, id: RecordId) -> Result<()>;

    fn count(&self) -> Result<usize>;

    /// Paths of records `offset..offset + limit` in store order.
    fn query_page(&self, offset: usize, limit: usize) -> Result<Vec<String>>;

    /// Configuration id of some stored record, used to detect a reader
    /// configured differently from the writer. Stores that cannot answer
    /// cheaply return `None`, as does an empty store.
    fn stored_config_id(&self) -> Result<Option<ConfigId>> {
        Ok(None)
    }
}

impl<S: IndexStore + ?Sized> IndexStore for Arc<S> {
    fn insert(&self, record: NewRecord) -> Result<RecordId> {
        (**self).insert(record)
    }

    fn query_by_words(&self, query: &WordQuery, limit: usize) -> Result<Vec<Candidate>> {
        (**self).query_by_words(query, limit)
    }

    fn query_by_path_exact(&self, path: &str) -> Result<Vec<RecordId>> {
        (**self).query_by_path_exact(path)
    }

    fn delete(&self, id: RecordId) -> Result<()> {
        (**self).delete(id)
    }

    fn count(&self) -> Result<usize> {
        (**self).count()
    }

    fn query_page(&self, offset: usize, limit: usize) -> Result<Vec<String>> {
        (**self).query_page(offset, limit)
    }

    fn stored_config_id(&self) -> Result<Option<ConfigId>> {
        (**self).stored_config_id()
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    records: BTreeMap<RecordId, StoredRecord>,
    // field -> word -> ids, each list kept sorted
    postings: HashMap<String, HashMap<IndexWord, Vec<RecordId>>>,
    paths: HashMap<String, Vec<RecordId>>,
}

impl Inner {
    fn index(&mut self, record: &StoredRecord) {
        for (field, words) in record.words.fields() {
            let field_postings = self.postings.entry(field.to_string()).or_default();
            for word in words {
                let ids = field_postings.entry(word.clone()).or_default();
                if let Err(pos) = ids.binary_search(&record.id) {
                    ids.insert(pos, record.id);
                }
            }
        }
        self.paths
            .entry(record.path.clone())
            .or_default()
            .push(record.id);
    }

    fn unindex(&mut self, record: &StoredRecord) {
        for (field, words) in record.words.fields() {
            let Some(field_postings) = self.postings.get_mut(field) else {
                continue;
            };
            for word in words {
                if let Some(ids) = field_postings.get_mut(word) {
                    ids.retain(|&id| id != record.id);
                    if ids.is_empty() {
                        field_postings.remove(word);
                    }
                }
            }
        }
        if let Some(ids) = self.paths.get_mut(&record.path) {
            ids.retain(|&id| id != record.id);
            if ids.is_empty() {
                self.paths.remove(&record.path);
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    records: Vec<StoredRecord>,
}

/// In-memory inverted index over word fields.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full record by id, including its word fields.
    pub fn get(&self, id: RecordId) -> Option<StoredRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Write every record to `path` as JSON.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read();
        let snapshot = Snapshot {
            next_id: inner.next_id,
            records: inner.records.values().cloned().collect(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &snapshot)?;
        writer.flush()?;
        info!(
            records = snapshot.records.len(),
            path = %path.display(),
            "saved index snapshot"
        );
        Ok(())
    }

    /// Rebuild a store, postings included, from a snapshot file.
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;

        let mut inner = Inner {
            next_id: snapshot.next_id,
            ..Inner::default()
        };
        for record in snapshot.records {
            inner.next_id = inner.next_id.max(record.id.0 + 1);
            inner.index(&record);
            inner.records.insert(record.id, record);
        }
        info!(
            records = inner.records.len(),
            path = %path.display(),
            "loaded index snapshot"
        );
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

impl IndexStore for MemoryStore {
    fn insert(&self, record: NewRecord) -> Result<RecordId> {
        let mut inner = self.inner.write();
        let id = RecordId(inner.next_id);
        inner.next_id += 1;

        let stored = StoredRecord {
            id,
            path: record.path,
            signature: record.signature,
            words: record.words,
            metadata: record.metadata,
        };
        inner.index(&stored);
        debug!(id = %id, path = %stored.path, "inserted record");
        inner.records.insert(id, stored);
        Ok(id)
    }

    fn query_by_words(&self, query: &WordQuery, limit: usize) -> Result<Vec<Candidate>> {
        if limit == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();

        // Accumulate one hit per matching word, like a term-count score.
        let mut hits: HashMap<RecordId, usize> = HashMap::new();
        for (field, words) in query.fields() {
            let Some(field_postings) = inner.postings.get(field) else {
                continue;
            };
            for word in words {
                if let Some(ids) = field_postings.get(word) {
                    for &id in ids {
                        *hits.entry(id).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut ranked: Vec<(RecordId, usize)> = hits.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);

        Ok(ranked
            .into_iter()
            .filter_map(|(id, word_hits)| {
                inner.records.get(&id).map(|r| Candidate {
                    id,
                    path: r.path.clone(),
                    signature: r.signature.clone(),
                    metadata: r.metadata.clone(),
                    word_hits,
                })
            })
            .collect())
    }

    fn query_by_path_exact(&self, path: &str) -> Result<Vec<RecordId>> {
        Ok(self
            .inner
            .read()
            .paths
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    fn delete(&self, id: RecordId) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.remove(&id) {
            inner.unindex(&record);
            debug!(id = %id, path = %record.path, "deleted record");
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.inner.read().records.len())
    }

    fn query_page(&self, offset: usize, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .skip(offset)
            .take(limit)
            .map(|r| r.path.clone())
            .collect())
    }

    fn stored_config_id(&self) -> Result<Option<ConfigId>> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .next()
            .map(|r| r.signature.config_id().clone()))
    }
}
