//! Described statement caching with LRU eviction.
//!
//! Describing a query (`Parse`) costs a round trip. The cache remembers the
//! input and output type ids the server declared for a query so repeated
//! executions go straight to `Execute`.
//!
//! ## Lifecycle
//!
//! 1. First execution sends `Parse`; the description is cached by key
//! 2. Later executions send `Execute` with the cached type ids
//! 3. A `CommandDataDescription` during `Execute` replaces the entry
//! 4. A stale type cache clears every entry together with the codecs

use std::num::NonZeroUsize;

use edb_protocol::{Capabilities, Cardinality, OutputFormat, TypeId};
use lru::LruCache;

/// Default maximum number of described statements per connection.
pub const DEFAULT_MAX_STATEMENTS: usize = 256;

/// Cache key: the same text run with another output format or expected
/// cardinality is described separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementKey {
    /// Query text.
    pub text: String,
    /// Requested output format.
    pub output_format: OutputFormat,
    /// Expected result cardinality.
    pub expected_cardinality: Cardinality,
}

/// What the server declared for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescribedStatement {
    /// Argument type.
    pub input_typedesc_id: TypeId,
    /// Result type.
    pub output_typedesc_id: TypeId,
    /// Result cardinality.
    pub result_cardinality: Cardinality,
    /// Capabilities the query uses.
    pub capabilities: Capabilities,
}

/// LRU cache of described statements.
pub struct StatementCache {
    cache: LruCache<StatementKey, DescribedStatement>,
    hits: u64,
    misses: u64,
}

impl StatementCache {
    /// Create a cache holding at most `max_size` statements (at least one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a statement, updating the LRU order.
    pub fn get(&mut self, key: &StatementKey) -> Option<DescribedStatement> {
        if let Some(described) = self.cache.get(key) {
            self.hits += 1;
            tracing::trace!(query = %key.text, "statement cache hit");
            Some(*described)
        } else {
            self.misses += 1;
            tracing::trace!(query = %key.text, "statement cache miss");
            None
        }
    }

    /// Insert or replace a statement.
    ///
    /// Returns the evicted key if the cache was full.
    pub fn insert(
        &mut self,
        key: StatementKey,
        described: DescribedStatement,
    ) -> Option<StatementKey> {
        tracing::debug!(
            query = %key.text,
            input = %described.input_typedesc_id,
            output = %described.output_typedesc_id,
            "caching statement description"
        );
        match self.cache.push(key, described) {
            Some((evicted, _)) if !self.cache.contains(&evicted) => Some(evicted),
            _ => None,
        }
    }

    /// Remove a statement.
    pub fn remove(&mut self, key: &StatementKey) -> Option<DescribedStatement> {
        self.cache.pop(key)
    }

    /// Drop every statement.
    pub fn clear(&mut self) {
        let count = self.cache.len();
        self.cache.clear();
        tracing::debug!(count, "cleared statement cache");
    }

    /// Number of cached statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number of cache hits.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of cache misses.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STATEMENTS)
    }
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("len", &self.cache.len())
            .field("cap", &self.cache.cap())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}
