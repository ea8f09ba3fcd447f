use crate::models::{Event, NewEvent, NewShortUrl, ShortUrl, UrlPatch};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short id already exists")]
    Conflict,
    #[error("short id not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Row store consumed by the shortener, the event recorder and the aggregator.
///
/// Implementations perform no business filtering (expiry, activity): `get`
/// answers "does the row exist", callers decide whether it is usable.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert a new short URL. Fails with `Conflict` if the id is taken.
    async fn create_with_code(&self, new_url: &NewShortUrl) -> StorageResult<ShortUrl>;

    /// Get a short URL by id, always from the authoritative store
    async fn get(&self, short_id: &str) -> Result<Option<ShortUrl>>;

    /// Lookup used on the redirect hot path. May be served from a cache.
    async fn get_for_redirect(&self, short_id: &str) -> Result<Option<ShortUrl>> {
        self.get(short_id).await
    }

    /// Atomically increment `visit_count` and set `last_accessed_at` in a single statement.
    async fn record_visit(&self, short_id: &str, accessed_at: i64) -> StorageResult<()>;

    /// Apply a partial update. Fails with `NotFound` if the row is absent.
    async fn update(&self, short_id: &str, patch: &UrlPatch) -> StorageResult<ShortUrl>;

    /// Delete a short URL. Fails with `NotFound` if the row is absent.
    async fn delete(&self, short_id: &str) -> StorageResult<()>;

    /// List URLs, newest first, optionally restricted to one owner
    async fn list(
        &self,
        owner_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShortUrl>>;

    /// Persist a visit event. Fails with `NotFound` if the short URL does not exist.
    async fn insert_event(&self, event: &NewEvent) -> StorageResult<Event>;

    /// Events of one short URL with `since <= occurred_at <= until`, oldest first
    async fn events_for_url(&self, short_id: &str, since: i64, until: i64) -> Result<Vec<Event>>;

    /// Events of every URL owned by `owner_id` in the window, oldest first
    async fn events_for_owner(&self, owner_id: &str, since: i64, until: i64)
        -> Result<Vec<Event>>;
}
