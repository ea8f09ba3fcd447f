//! Visit analytics: request parsing, geolocation, event recording and stats.

pub mod aggregator;
pub mod geoip;
pub mod ip_extractor;
pub mod recorder;
pub mod user_agent;
pub mod utm;

pub use aggregator::{aggregate, Aggregator, Bucket, DailyCount, Stats, StatsScope, TimeRange};
pub use geoip::{GeoError, GeoIpService, GeoLocator};
pub use ip_extractor::{anonymize_ip, extract_client_ip};
pub use recorder::{EventRecorder, VisitContext};
pub use user_agent::parse_user_agent;
pub use utm::extract_utm;
