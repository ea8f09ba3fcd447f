use axum::{
    extract::{ConnectInfo, Path, RawQuery, State},
    http::{
        header::{self, HeaderMap, HeaderValue},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use super::dispatcher::{Visit, VisitDispatcher};
use super::resolver::RedirectResolver;
use crate::analytics::{extract_client_ip, VisitContext};
use crate::config::{AnalyticsConfig, RedirectMode};
use crate::error::ShortenerError;
use crate::models::now_millis;

pub struct RedirectState {
    pub resolver: RedirectResolver,
    pub dispatcher: VisitDispatcher,
    pub analytics: AnalyticsConfig,
    pub redirect_mode: RedirectMode,
}

/// Redirect to original URL
///
/// Missing, expired and deactivated links all answer with the same 404. The
/// visit is queued for counting and recording before the response is built.
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(short_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let now = now_millis();

    let url = match state
        .resolver
        .resolve(&short_id, now)
        .await
        .and_then(|resolution| resolution.into_result())
    {
        Ok(url) => url,
        Err(err) => {
            if err.status_code() == StatusCode::NOT_FOUND {
                debug!(short_id = %short_id, reason = %err, "Short URL not usable");
            }
            return err.into_response();
        }
    };

    let location = match location_header(&url.original_url) {
        Ok(location) => location,
        Err(err) => return err.into_response(),
    };

    state.dispatcher.dispatch(Visit {
        short_id: url.short_id,
        owner_id: url.owner_id,
        context: VisitContext {
            ip: Some(extract_client_ip(&headers, addr.ip(), &state.analytics)),
            user_agent: header_string(&headers, header::USER_AGENT),
            referrer: header_string(&headers, header::REFERER),
            query,
            occurred_at: now,
        },
    });

    (
        state.redirect_mode.status_code(),
        [
            (header::LOCATION, location),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
    )
        .into_response()
}

fn location_header(original_url: &str) -> Result<HeaderValue, ShortenerError> {
    if let Ok(value) = HeaderValue::from_str(original_url) {
        return Ok(value);
    }
    // Non-ASCII targets go out in their punycode / percent-encoded form
    let normalized = url::Url::parse(original_url)
        .map_err(|e| ShortenerError::Storage(anyhow::anyhow!("stored URL is invalid: {e}")))?;
    HeaderValue::from_str(normalized.as_str())
        .map_err(|e| ShortenerError::Storage(anyhow::anyhow!("stored URL is not a valid header: {e}")))
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: &'static str,
    }

    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_header_keeps_ascii_urls_verbatim() {
        let value = location_header("https://example.com").unwrap();
        assert_eq!(value, "https://example.com");
    }

    #[test]
    fn test_location_header_encodes_unicode() {
        let value = location_header("https://例え.jp/パス").unwrap();
        assert_eq!(
            value,
            "https://xn--r8jz45g.jp/%E3%83%91%E3%82%B9"
        );
    }
}
