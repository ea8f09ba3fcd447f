//! Redirect decision for one short id.

use std::sync::Arc;

use crate::error::ShortenerError;
use crate::models::ShortUrl;
use crate::shortener::Shortener;

/// Terminal state of a redirect lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Redirecting(ShortUrl),
    NotFound,
    Expired,
    Inactive,
}

impl Resolution {
    /// Collapse into the caller-facing result. The three unusable states stay
    /// distinct as errors but render identically.
    pub fn into_result(self) -> Result<ShortUrl, ShortenerError> {
        match self {
            Resolution::Redirecting(url) => Ok(url),
            Resolution::NotFound => Err(ShortenerError::NotFound),
            Resolution::Expired => Err(ShortenerError::Expired),
            Resolution::Inactive => Err(ShortenerError::Inactive),
        }
    }
}

pub struct RedirectResolver {
    shortener: Arc<Shortener>,
}

impl RedirectResolver {
    pub fn new(shortener: Arc<Shortener>) -> Self {
        Self { shortener }
    }

    /// Look up `short_id` and decide its outcome at `now`.
    ///
    /// Only storage failures are errors. Counters are not touched here.
    pub async fn resolve(&self, short_id: &str, now: i64) -> Result<Resolution, ShortenerError> {
        let url = match self.shortener.resolve_for_redirect(short_id).await {
            Ok(url) => url,
            Err(ShortenerError::NotFound) => return Ok(Resolution::NotFound),
            Err(err) => return Err(err),
        };

        if url.is_expired_at(now) {
            return Ok(Resolution::Expired);
        }
        if !url.is_active {
            return Ok(Resolution::Inactive);
        }
        Ok(Resolution::Redirecting(url))
    }
}
