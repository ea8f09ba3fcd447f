use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Placeholder for device and geo fields that could not be determined.
pub const UNKNOWN: &str = "Unknown";

/// Parsed user-agent details. Never partially populated: unknown parts are [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    /// One of `desktop`, `mobile`, `tablet`, `bot` or `unknown`.
    pub device_type: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            browser: UNKNOWN.to_string(),
            browser_version: UNKNOWN.to_string(),
            os: UNKNOWN.to_string(),
            os_version: UNKNOWN.to_string(),
            device_type: "unknown".to_string(),
        }
    }
}

/// Coarse location resolved from the visitor IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GeoInfo {
    pub country: String,
    pub city: String,
    pub region: String,
    pub timezone: String,
}

impl Default for GeoInfo {
    fn default() -> Self {
        Self {
            country: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            timezone: UNKNOWN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UtmParams {
    #[sqlx(rename = "utm_source")]
    pub source: Option<String>,
    #[sqlx(rename = "utm_medium")]
    pub medium: Option<String>,
    #[sqlx(rename = "utm_campaign")]
    pub campaign: Option<String>,
}

/// One recorded visit. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub short_id: String,
    pub occurred_at: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub referrer: String,
    #[sqlx(flatten)]
    pub device: DeviceInfo,
    #[sqlx(flatten)]
    pub geo: GeoInfo,
    #[sqlx(flatten)]
    pub utm: UtmParams,
}

/// An event before the store assigns its id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub short_id: String,
    pub occurred_at: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub referrer: String,
    pub device: DeviceInfo,
    pub geo: GeoInfo,
    pub utm: UtmParams,
}

impl NewEvent {
    pub fn into_event(self, id: i64) -> Event {
        Event {
            id,
            short_id: self.short_id,
            occurred_at: self.occurred_at,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            referrer: self.referrer,
            device: self.device,
            geo: self.geo,
            utm: self.utm,
        }
    }
}
