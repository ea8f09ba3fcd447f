//! URL creation, lookup and management on top of [`Storage`].

use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::error::ShortenerError;
use crate::idgen;
use crate::models::{now_millis, NewShortUrl, ShortUrl, UrlPatch};
use crate::storage::{Storage, StorageError};

/// Bounded retries for generated ids that collide with an existing row.
pub const MAX_GENERATION_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub custom_slug: Option<String>,
    pub expires_at: Option<i64>,
    pub owner_id: Option<String>,
}

/// Accept only absolute `http`/`https` URLs with a host.
pub fn validate_url(raw: &str) -> Result<Url, ShortenerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ShortenerError::InvalidUrl("URL cannot be empty".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| ShortenerError::InvalidUrl(format!("{trimmed}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ShortenerError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(ShortenerError::InvalidUrl(format!("{trimmed}: missing host"))),
    }
}

/// Validate the public base URL that short links are built on.
pub fn validate_base_url(raw: &str) -> Result<Url, ShortenerError> {
    validate_url(raw).map_err(|e| ShortenerError::InvalidBaseUrl(e.to_string()))
}

pub struct Shortener {
    storage: Arc<dyn Storage>,
    base_url: String,
    id_length: usize,
}

impl Shortener {
    pub fn new(
        storage: Arc<dyn Storage>,
        base_url: &str,
        id_length: usize,
    ) -> Result<Self, ShortenerError> {
        let base = validate_base_url(base_url)?;
        Ok(Self {
            storage,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            id_length,
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Public link for a short id.
    pub fn short_url_for(&self, short_id: &str) -> String {
        format!("{}/{}", self.base_url, short_id)
    }

    /// Validate `original_url` and persist a new short URL with `visit_count = 0`.
    pub async fn create(
        &self,
        original_url: &str,
        options: CreateOptions,
    ) -> Result<ShortUrl, ShortenerError> {
        validate_url(original_url)?;

        let mut new_url = NewShortUrl {
            short_id: String::new(),
            original_url: original_url.trim().to_string(),
            owner_id: options.owner_id,
            created_at: now_millis(),
            expires_at: options.expires_at,
        };

        if let Some(slug) = options.custom_slug {
            if !idgen::validate_custom_slug(&slug) {
                return Err(ShortenerError::InvalidSlug(format!(
                    "'{slug}' must be 1-{} characters of [A-Za-z0-9_-] and not a reserved path",
                    idgen::MAX_SLUG_LENGTH
                )));
            }
            new_url.short_id = slug;
            return match self.storage.create_with_code(&new_url).await {
                Ok(url) => {
                    info!(short_id = %url.short_id, "created short URL with custom slug");
                    Ok(url)
                }
                Err(StorageError::Conflict) => Err(ShortenerError::SlugTaken(new_url.short_id)),
                Err(e) => Err(e.into()),
            };
        }

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            new_url.short_id = idgen::generate(self.id_length);
            match self.storage.create_with_code(&new_url).await {
                Ok(url) => {
                    info!(short_id = %url.short_id, "created short URL");
                    return Ok(url);
                }
                Err(StorageError::Conflict) => {
                    debug!(short_id = %new_url.short_id, attempt, "generated id collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ShortenerError::Collision(MAX_GENERATION_ATTEMPTS))
    }

    /// Row lookup only; activity and expiry are the caller's policy.
    pub async fn resolve(&self, short_id: &str) -> Result<ShortUrl, ShortenerError> {
        self.storage
            .get(short_id)
            .await?
            .ok_or(ShortenerError::NotFound)
    }

    /// Same as [`resolve`](Self::resolve) but allowed to use the redirect cache.
    pub async fn resolve_for_redirect(&self, short_id: &str) -> Result<ShortUrl, ShortenerError> {
        self.storage
            .get_for_redirect(short_id)
            .await?
            .ok_or(ShortenerError::NotFound)
    }

    pub async fn record_visit(&self, short_id: &str) -> Result<(), ShortenerError> {
        self.storage.record_visit(short_id, now_millis()).await?;
        Ok(())
    }

    pub async fn update(&self, short_id: &str, patch: UrlPatch) -> Result<ShortUrl, ShortenerError> {
        let mut patch = patch;
        if let Some(ref url) = patch.original_url {
            validate_url(url)?;
            patch.original_url = Some(url.trim().to_string());
        }
        if patch.is_empty() {
            return self.resolve(short_id).await;
        }

        let url = self.storage.update(short_id, &patch).await?;
        info!(short_id = %short_id, "updated short URL");
        Ok(url)
    }

    pub async fn delete(&self, short_id: &str) -> Result<(), ShortenerError> {
        self.storage.delete(short_id).await?;
        info!(short_id = %short_id, "deleted short URL");
        Ok(())
    }

    pub async fn list(
        &self,
        owner_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShortUrl>, ShortenerError> {
        Ok(self.storage.list(owner_id, limit, offset).await?)
    }
}
