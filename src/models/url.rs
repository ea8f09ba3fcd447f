use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

/// A persisted short identifier → destination mapping.
///
/// All timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShortUrl {
    pub short_id: String,
    pub original_url: String,
    pub owner_id: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub is_active: bool,
    pub visit_count: i64,
    pub last_accessed_at: Option<i64>,
}

impl ShortUrl {
    /// An entry is expired from the instant `now` reaches `expires_at`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}

/// Row about to be inserted. The id has already been generated or validated.
#[derive(Debug, Clone)]
pub struct NewShortUrl {
    pub short_id: String,
    pub original_url: String,
    pub owner_id: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

/// Partial update of a short URL. `expires_at: Some(None)` clears the expiry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl UrlPatch {
    pub fn is_empty(&self) -> bool {
        self.original_url.is_none() && self.expires_at.is_none() && self.is_active.is_none()
    }
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUrlRequest {
    pub url: String,
    pub custom_slug: Option<String>,
    pub expires_at: Option<i64>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUrlResponse {
    pub short_url: String,
    pub short_id: String,
    pub original_url: String,
    pub expires_at: Option<i64>,
}
