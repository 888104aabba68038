//! Bounded retry with exponential backoff around any [`IndexStore`].
//!
//! Remote stores fail transiently; this decorator retries calls whose error
//! is retryable a fixed number of times, doubling the delay up to a cap.
//! Inserts are not idempotent, so they are only retried when
//! [`RetryPolicy::retry_inserts`] is set.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigId;
use crate::error::Result;
use crate::index::{Candidate, IndexStore, NewRecord, RecordId};
use crate::words::WordQuery;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub retry_inserts: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            retry_inserts: false,
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps, for tests and in-process stores.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            retry_inserts: false,
        }
    }
}

/// Store decorator applying a [`RetryPolicy`] to every call.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: IndexStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn with_retry<T, F>(&self, operation: &str, retryable: bool, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let max_attempts = if retryable {
            self.policy.max_attempts.max(1)
        } else {
            1
        };
        let mut delay = self.policy.initial_backoff;
        let mut attempt = 1;

        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        error = %err,
                        "index store call failed, retrying"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    delay = (delay * 2).min(self.policy.max_backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<S: IndexStore> IndexStore for RetryingStore<S> {
    fn insert(&self, record: NewRecord) -> Result<RecordId> {
        self.with_retry("insert", self.policy.retry_inserts, || {
            self.inner.insert(record.clone())
        })
    }

    fn query_by_words(&self, query: &WordQuery, limit: usize) -> Result<Vec<Candidate>> {
        self.with_retry("query_by_words", true, || {
            self.inner.query_by_words(query, limit)
        })
    }

    fn query_by_path_exact(&self, path: &str) -> Result<Vec<RecordId>> {
        self.with_retry("query_by_path_exact", true, || {
            self.inner.query_by_path_exact(path)
        })
    }

    fn delete(&self, id: RecordId) -> Result<()> {
        self.with_retry("delete", true, || self.inner.delete(id))
    }

    fn count(&self) -> Result<usize> {
        self.with_retry("count", true, || self.inner.count())
    }

    fn query_page(&self, offset: usize, limit: usize) -> Result<Vec<String>> {
        self.with_retry("query_page", true, || self.inner.query_page(offset, limit))
    }

    fn stored_config_id(&self) -> Result<Option<ConfigId>> {
        self.with_retry("stored_config_id", true, || self.inner.stored_config_id())
    }
}
