pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

use std::sync::Arc;
use tracing::info;

use crate::config::{DatabaseBackend, DatabaseConfig};

/// Columns selected for every `ShortUrl` row, in `FromRow` order.
pub(crate) const URL_COLUMNS: &str =
    "short_id, original_url, owner_id, created_at, expires_at, is_active, visit_count, last_accessed_at";

/// Columns selected for every `Event` row.
pub(crate) const EVENT_COLUMNS: &str = "events.id AS id, events.short_id AS short_id, events.occurred_at AS occurred_at, \
    events.ip_address AS ip_address, events.user_agent AS user_agent, events.referrer AS referrer, \
    events.browser AS browser, events.browser_version AS browser_version, events.os AS os, \
    events.os_version AS os_version, events.device_type AS device_type, events.country AS country, \
    events.city AS city, events.region AS region, events.timezone AS timezone, \
    events.utm_source AS utm_source, events.utm_medium AS utm_medium, events.utm_campaign AS utm_campaign";

/// Connect to the configured backend and create its schema.
pub async fn open(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.url);
            Arc::new(SqliteStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.url, config.max_connections).await?)
        }
    };
    storage.init().await?;
    Ok(storage)
}
