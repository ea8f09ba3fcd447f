use crate::models::{Event, NewEvent, NewShortUrl, ShortUrl, UrlPatch};
use crate::storage::{Storage, StorageError, StorageResult, EVENT_COLUMNS, URL_COLUMNS};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS urls (
                short_id TEXT PRIMARY KEY,
                original_url TEXT NOT NULL,
                owner_id TEXT,
                created_at BIGINT NOT NULL,
                expires_at BIGINT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                visit_count BIGINT NOT NULL DEFAULT 0,
                last_accessed_at BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_urls_owner_id ON urls(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                short_id TEXT NOT NULL,
                occurred_at BIGINT NOT NULL,
                ip_address TEXT NOT NULL DEFAULT '',
                user_agent TEXT NOT NULL DEFAULT '',
                referrer TEXT NOT NULL DEFAULT '',
                browser TEXT NOT NULL,
                browser_version TEXT NOT NULL,
                os TEXT NOT NULL,
                os_version TEXT NOT NULL,
                device_type TEXT NOT NULL,
                country TEXT NOT NULL,
                city TEXT NOT NULL,
                region TEXT NOT NULL,
                timezone TEXT NOT NULL,
                utm_source TEXT,
                utm_medium TEXT,
                utm_campaign TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_short_id_occurred_at ON events(short_id, occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_with_code(&self, new_url: &NewShortUrl) -> StorageResult<ShortUrl> {
        let url = sqlx::query_as::<_, ShortUrl>(&format!(
            r#"
            INSERT INTO urls (short_id, original_url, owner_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (short_id) DO NOTHING
            RETURNING {URL_COLUMNS}
            "#
        ))
        .bind(&new_url.short_id)
        .bind(&new_url.original_url)
        .bind(&new_url.owner_id)
        .bind(new_url.created_at)
        .bind(new_url.expires_at)
        .fetch_optional(self.pool.as_ref())
        .await?;

        url.ok_or(StorageError::Conflict)
    }

    async fn get(&self, short_id: &str) -> Result<Option<ShortUrl>> {
        let url = sqlx::query_as::<_, ShortUrl>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE short_id = $1"
        ))
        .bind(short_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(url)
    }

    async fn record_visit(&self, short_id: &str, accessed_at: i64) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE urls
            SET visit_count = visit_count + 1, last_accessed_at = $1
            WHERE short_id = $2
            "#,
        )
        .bind(accessed_at)
        .bind(short_id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn update(&self, short_id: &str, patch: &UrlPatch) -> StorageResult<ShortUrl> {
        let url = sqlx::query_as::<_, ShortUrl>(&format!(
            r#"
            UPDATE urls
            SET original_url = COALESCE($1, original_url),
                expires_at = CASE WHEN $2 THEN $3 ELSE expires_at END,
                is_active = COALESCE($4, is_active)
            WHERE short_id = $5
            RETURNING {URL_COLUMNS}
            "#
        ))
        .bind(patch.original_url.as_deref())
        .bind(patch.expires_at.is_some())
        .bind(patch.expires_at.flatten())
        .bind(patch.is_active)
        .bind(short_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        url.ok_or(StorageError::NotFound)
    }

    async fn delete(&self, short_id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM urls WHERE short_id = $1")
            .bind(short_id)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list(
        &self,
        owner_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShortUrl>> {
        let urls = sqlx::query_as::<_, ShortUrl>(&format!(
            r#"
            SELECT {URL_COLUMNS} FROM urls
            WHERE ($1::TEXT IS NULL OR owner_id = $1)
            ORDER BY created_at DESC, short_id
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(urls)
    }

    async fn insert_event(&self, event: &NewEvent) -> StorageResult<Event> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO events (
                short_id, occurred_at, ip_address, user_agent, referrer,
                browser, browser_version, os, os_version, device_type,
                country, city, region, timezone,
                utm_source, utm_medium, utm_campaign
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
            WHERE EXISTS (SELECT 1 FROM urls WHERE short_id = $1)
            RETURNING id
            "#,
        )
        .bind(&event.short_id)
        .bind(event.occurred_at)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.referrer)
        .bind(&event.device.browser)
        .bind(&event.device.browser_version)
        .bind(&event.device.os)
        .bind(&event.device.os_version)
        .bind(&event.device.device_type)
        .bind(&event.geo.country)
        .bind(&event.geo.city)
        .bind(&event.geo.region)
        .bind(&event.geo.timezone)
        .bind(&event.utm.source)
        .bind(&event.utm.medium)
        .bind(&event.utm.campaign)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match id {
            Some(id) => Ok(event.clone().into_event(id)),
            None => Err(StorageError::NotFound),
        }
    }

    async fn events_for_url(&self, short_id: &str, since: i64, until: i64) -> Result<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE events.short_id = $1 AND events.occurred_at BETWEEN $2 AND $3
            ORDER BY events.occurred_at, events.id
            "#
        ))
        .bind(short_id)
        .bind(since)
        .bind(until)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(events)
    }

    async fn events_for_owner(
        &self,
        owner_id: &str,
        since: i64,
        until: i64,
    ) -> Result<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            JOIN urls ON urls.short_id = events.short_id
            WHERE urls.owner_id = $1 AND events.occurred_at BETWEEN $2 AND $3
            ORDER BY events.occurred_at, events.id
            "#
        ))
        .bind(owner_id)
        .bind(since)
        .bind(until)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(events)
    }
}
