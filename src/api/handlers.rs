use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRef, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::{Aggregator, Stats, StatsScope, TimeRange};
use crate::error::ShortenerError;
use crate::models::{now_millis, CreateUrlRequest, CreateUrlResponse, ShortUrl, UrlPatch};
use crate::realtime::RealtimeState;
use crate::shortener::{CreateOptions, Shortener};

const MAX_LIST_LIMIT: i64 = 500;

pub struct AppState {
    pub shortener: Arc<Shortener>,
    pub aggregator: Arc<Aggregator>,
    pub realtime: RealtimeState,
}

impl FromRef<Arc<AppState>> for RealtimeState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.realtime.clone()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub owner_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    #[serde(default)]
    pub time_range: TimeRange,
}

/// Body rejections answer with the JSON error shape instead of axum's plain text.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ShortenerError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ShortenerError::InvalidRequest(rejection.body_text()))
}

fn stats_range(
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<TimeRange, ShortenerError> {
    query
        .map(|Query(query)| query.time_range)
        .map_err(|_| ShortenerError::InvalidTimeRange("expected 24h, 7d, 30d or 90d".to_string()))
}

/// Create a new short URL
pub async fn create_url(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateUrlRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateUrlResponse>), ShortenerError> {
    let payload = json_body(payload)?;
    let url = state
        .shortener
        .create(
            &payload.url,
            CreateOptions {
                custom_slug: payload.custom_slug,
                expires_at: payload.expires_at,
                owner_id: payload.owner_id,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateUrlResponse {
            short_url: state.shortener.short_url_for(&url.short_id),
            short_id: url.short_id,
            original_url: url.original_url,
            expires_at: url.expires_at,
        }),
    ))
}

/// Get a short URL by id, including counters and inactive/expired rows
pub async fn get_url(
    State(state): State<Arc<AppState>>,
    Path(short_id): Path<String>,
) -> Result<Json<ShortUrl>, ShortenerError> {
    Ok(Json(state.shortener.resolve(&short_id).await?))
}

pub async fn update_url(
    State(state): State<Arc<AppState>>,
    Path(short_id): Path<String>,
    patch: Result<Json<UrlPatch>, JsonRejection>,
) -> Result<Json<ShortUrl>, ShortenerError> {
    let patch = json_body(patch)?;
    Ok(Json(state.shortener.update(&short_id, patch).await?))
}

pub async fn delete_url(
    State(state): State<Arc<AppState>>,
    Path(short_id): Path<String>,
) -> Result<StatusCode, ShortenerError> {
    state.shortener.delete(&short_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List short URLs, newest first
pub async fn list_urls(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<ShortUrl>>, ShortenerError> {
    let Query(query) =
        query.map_err(|rejection| ShortenerError::InvalidRequest(rejection.body_text()))?;
    let limit = query.limit.clamp(1, MAX_LIST_LIMIT);
    let offset = query.offset.max(0);
    let urls = state
        .shortener
        .list(query.owner_id.as_deref(), limit, offset)
        .await?;
    Ok(Json(urls))
}

/// Stats of one short URL over `?timeRange=24h|7d|30d|90d` (default 7d)
pub async fn url_stats(
    State(state): State<Arc<AppState>>,
    Path(short_id): Path<String>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Json<Stats>, ShortenerError> {
    let range = stats_range(query)?;
    let stats = state
        .aggregator
        .query(&StatsScope::Url(short_id), range, now_millis())
        .await?;
    Ok(Json(stats))
}

/// Stats across every URL of one owner
pub async fn owner_stats(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Json<Stats>, ShortenerError> {
    let range = stats_range(query)?;
    let stats = state
        .aggregator
        .query(&StatsScope::Owner(owner_id), range, now_millis())
        .await?;
    Ok(Json(stats))
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
