use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::libxslt::StylesheetPtr;
use crate::schema::SchemaAggregate;

/// Default capacity of each artifact kind
pub const DEFAULT_MAX_ENTRIES: u64 = 64;

/// Opt-in in-memory cache for compiled schema aggregates and style-sheets
///
/// Entries are keyed by a SHA-256 over every source's location and bytes, so editing a
/// schema or style-sheet on disk yields a new key instead of a stale hit. Documents pulled
/// in through nested `xs:include`/`xsl:import` are not part of the key.
///
/// It uses `moka` to handle concurrent access and "thundering herd" protection (an artifact
/// is only compiled once even if several threads ask for it at the same time). Failed
/// compilations are never cached.
pub struct ArtifactCache {
    schemas: Cache<String, SchemaAggregate>,
    stylesheets: Cache<String, StylesheetPtr>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of cache usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub schemas: u64,
    pub stylesheets: u64,
    pub hits: u64,
    pub misses: u64,
}

impl ArtifactCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            schemas: Cache::builder().max_capacity(max_entries).build(),
            stylesheets: Cache::builder().max_capacity(max_entries).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a compiled schema aggregate, or compile it if missing
    ///
    /// `compile` only runs on a miss; concurrent requests for the same key wait for it.
    pub fn schema_or_compile<F, E>(&self, key: String, compile: F) -> Result<SchemaAggregate, E>
    where
        F: FnOnce() -> Result<SchemaAggregate, E>,
        E: Clone + Send + Sync + 'static,
    {
        let entry = self
            .schemas
            .entry(key)
            .or_try_insert_with(compile)
            .map_err(|e| (*e).clone())?;
        self.record(entry.is_fresh(), "schema");
        Ok(entry.into_value())
    }

    /// Get a compiled style-sheet, or compile it if missing
    pub fn stylesheet_or_compile<F, E>(&self, key: String, compile: F) -> Result<StylesheetPtr, E>
    where
        F: FnOnce() -> Result<StylesheetPtr, E>,
        E: Clone + Send + Sync + 'static,
    {
        let entry = self
            .stylesheets
            .entry(key)
            .or_try_insert_with(compile)
            .map_err(|e| (*e).clone())?;
        self.record(entry.is_fresh(), "stylesheet");
        Ok(entry.into_value())
    }

    fn record(&self, fresh: bool, kind: &'static str) {
        if fresh {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(kind, "Compiled artifact cached");
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(kind, "Artifact cache hit");
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.schemas.run_pending_tasks();
        self.stylesheets.run_pending_tasks();
        CacheStats {
            schemas: self.schemas.entry_count(),
            stylesheets: self.stylesheets.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.schemas.invalidate_all();
        self.stylesheets.invalidate_all();
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Cache key over an ordered list of `(location, content)` pairs
pub(crate) fn content_key<'a, I>(kind: &str, sources: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    for (location, content) in sources {
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart
        hasher.update((location.len() as u64).to_le_bytes());
        hasher.update(location.as_bytes());
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(content);
    }
    format!("{:x}", hasher.finalize())
}
