use crate::models::{Event, NewEvent, NewShortUrl, ShortUrl, UrlPatch};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Storage wrapper that serves redirect lookups from an in-process read cache.
///
/// Only [`Storage::get_for_redirect`] reads the cache; every other read goes to
/// the inner store, so management and stats views always see live counters.
/// Writes that change resolution (update, delete) invalidate the entry. Visit
/// counting does not, since the counters are never consulted on redirect.
///
/// The cache only sees writes made through this instance. Processes that share
/// the database must change URLs through the API of the process that owns the
/// cache, or the stale entry lives until its TTL runs out.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    read_cache: Cache<String, Option<ShortUrl>>,
    /// Bumped by every invalidation. A miss that raced one drops what it loaded.
    invalidations: AtomicU64,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            inner,
            read_cache,
            invalidations: AtomicU64::new(0),
        }
    }

    async fn invalidate_cache(&self, short_id: &str) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.read_cache.invalidate(short_id).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_with_code(&self, new_url: &NewShortUrl) -> StorageResult<ShortUrl> {
        let result = self.inner.create_with_code(new_url).await?;

        // Replaces a cached negative lookup for this id, if any
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.read_cache
            .insert(result.short_id.clone(), Some(result.clone()))
            .await;

        Ok(result)
    }

    async fn get(&self, short_id: &str) -> Result<Option<ShortUrl>> {
        self.inner.get(short_id).await
    }

    async fn get_for_redirect(&self, short_id: &str) -> Result<Option<ShortUrl>> {
        if let Some(cached) = self.read_cache.get(short_id).await {
            return Ok(cached);
        }

        let seen = self.invalidations.load(Ordering::SeqCst);
        let result = self.inner.get(short_id).await?;
        self.read_cache
            .insert(short_id.to_string(), result.clone())
            .await;

        // An update or delete finished while the row was loading: the row may
        // predate it, so it must not outlive this call in the cache
        if self.invalidations.load(Ordering::SeqCst) != seen {
            self.read_cache.invalidate(short_id).await;
        }

        Ok(result)
    }

    async fn record_visit(&self, short_id: &str, accessed_at: i64) -> StorageResult<()> {
        self.inner.record_visit(short_id, accessed_at).await
    }

    async fn update(&self, short_id: &str, patch: &UrlPatch) -> StorageResult<ShortUrl> {
        let result = self.inner.update(short_id, patch).await;
        self.invalidate_cache(short_id).await;
        result
    }

    async fn delete(&self, short_id: &str) -> StorageResult<()> {
        let result = self.inner.delete(short_id).await;
        self.invalidate_cache(short_id).await;
        result
    }

    async fn list(
        &self,
        owner_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShortUrl>> {
        self.inner.list(owner_id, limit, offset).await
    }

    async fn insert_event(&self, event: &NewEvent) -> StorageResult<Event> {
        self.inner.insert_event(event).await
    }

    async fn events_for_url(&self, short_id: &str, since: i64, until: i64) -> Result<Vec<Event>> {
        self.inner.events_for_url(short_id, since, until).await
    }

    async fn events_for_owner(
        &self,
        owner_id: &str,
        since: i64,
        until: i64,
    ) -> Result<Vec<Event>> {
        self.inner.events_for_owner(owner_id, since, until).await
    }
}
