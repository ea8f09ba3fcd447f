mod event;
mod url;

pub use event::{DeviceInfo, Event, GeoInfo, NewEvent, UtmParams, UNKNOWN};
pub use url::{CreateUrlRequest, CreateUrlResponse, NewShortUrl, ShortUrl, UrlPatch};

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
