//! Turns the raw context of a redirect into a stored, broadcast visit event.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::analytics::geoip::{GeoError, GeoLocator};
use crate::analytics::ip_extractor::anonymize_ip;
use crate::analytics::user_agent::parse_user_agent;
use crate::analytics::utm::extract_utm;
use crate::models::{Event, GeoInfo, NewEvent};
use crate::realtime::{url_room, user_room, RoomBroadcaster, ServerMessage};
use crate::storage::{Storage, StorageResult};

/// Request details captured on the redirect path.
#[derive(Debug, Clone, Default)]
pub struct VisitContext {
    pub ip: Option<IpAddr>,
    pub user_agent: String,
    pub referrer: String,
    /// Raw query string of the redirect request, if any.
    pub query: Option<String>,
    pub occurred_at: i64,
}

pub struct EventRecorder {
    storage: Arc<dyn Storage>,
    geo: Arc<dyn GeoLocator>,
    broadcaster: Arc<RoomBroadcaster>,
    anonymize_ip: bool,
}

impl EventRecorder {
    pub fn new(
        storage: Arc<dyn Storage>,
        geo: Arc<dyn GeoLocator>,
        broadcaster: Arc<RoomBroadcaster>,
        anonymize_ip: bool,
    ) -> Self {
        Self {
            storage,
            geo,
            broadcaster,
            anonymize_ip,
        }
    }

    /// Persist one visit of `short_id` and notify its rooms.
    ///
    /// Parsing and geo failures degrade to "Unknown" fields; only the store
    /// can fail the call, e.g. with `NotFound` when the URL is gone.
    pub async fn record(
        &self,
        short_id: &str,
        owner_id: Option<&str>,
        ctx: VisitContext,
    ) -> StorageResult<Event> {
        let ip = ctx
            .ip
            .map(|ip| if self.anonymize_ip { anonymize_ip(ip) } else { ip });

        let geo = match ip {
            Some(ip) => self.locate(ip).await,
            None => GeoInfo::default(),
        };

        let new_event = NewEvent {
            short_id: short_id.to_string(),
            occurred_at: ctx.occurred_at,
            ip_address: ip.map(|ip| ip.to_string()).unwrap_or_default(),
            device: parse_user_agent(&ctx.user_agent),
            utm: extract_utm(ctx.query.as_deref(), &ctx.referrer),
            user_agent: ctx.user_agent,
            referrer: ctx.referrer,
            geo,
        };

        let event = self.storage.insert_event(&new_event).await?;
        debug!(short_id = %short_id, event_id = event.id, "Recorded visit event");

        self.publish(&url_room(short_id), &event);
        if let Some(owner_id) = owner_id {
            self.publish(&user_room(owner_id), &event);
        }

        Ok(event)
    }

    async fn locate(&self, ip: IpAddr) -> GeoInfo {
        match self.geo.locate(ip).await {
            Ok(geo) => geo,
            Err(GeoError::Unavailable) | Err(GeoError::NotFound(_)) => GeoInfo::default(),
            Err(err) => {
                warn!(error = %err, "GeoIP lookup failed");
                GeoInfo::default()
            }
        }
    }

    fn publish(&self, room: &str, event: &Event) {
        let message = ServerMessage::Event {
            data: event.clone(),
        };
        if let Err(err) = self.broadcaster.publish(room, &message) {
            warn!(room = %room, error = %err, "Broadcast failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewShortUrl;
    use crate::realtime::ChannelConnection;
    use crate::storage::{SqliteStorage, StorageError};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct FixedGeo(Result<GeoInfo, ()>);

    #[async_trait]
    impl GeoLocator for FixedGeo {
        async fn locate(&self, ip: IpAddr) -> Result<GeoInfo, GeoError> {
            self.0.clone().map_err(|_| GeoError::Lookup {
                ip,
                reason: "database corrupted".to_string(),
            })
        }
    }

    async fn setup(geo: FixedGeo, anonymize: bool) -> (Arc<dyn Storage>, Arc<RoomBroadcaster>, EventRecorder) {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new("sqlite::memory:", 5).await.unwrap());
        storage.init().await.unwrap();
        storage
            .create_with_code(&NewShortUrl {
                short_id: "abc123".to_string(),
                original_url: "https://example.com/".to_string(),
                owner_id: Some("u1".to_string()),
                created_at: 1_000,
                expires_at: None,
            })
            .await
            .unwrap();
        let broadcaster = Arc::new(RoomBroadcaster::new());
        let recorder = EventRecorder::new(storage.clone(), Arc::new(geo), broadcaster.clone(), anonymize);
        (storage, broadcaster, recorder)
    }

    fn context() -> VisitContext {
        VisitContext {
            ip: Some("203.0.113.77".parse().unwrap()),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            referrer: "https://news.example.com/?utm_source=news&utm_medium=email".to_string(),
            query: Some("utm_source=twitter".to_string()),
            occurred_at: 2_000,
        }
    }

    #[tokio::test]
    async fn test_record_parses_context() {
        let geo = GeoInfo {
            country: "France".into(),
            city: "Paris".into(),
            region: "Ile-de-France".into(),
            timezone: "Europe/Paris".into(),
        };
        let (storage, _, recorder) = setup(FixedGeo(Ok(geo.clone())), false).await;

        let event = recorder.record("abc123", Some("u1"), context()).await.unwrap();

        assert_eq!(event.short_id, "abc123");
        assert_eq!(event.ip_address, "203.0.113.77");
        assert_eq!(event.device.browser, "Chrome");
        assert_eq!(event.device.os, "Windows");
        assert_eq!(event.device.device_type, "desktop");
        assert_eq!(event.geo, geo);
        assert_eq!(event.utm.source.as_deref(), Some("twitter"));
        assert_eq!(event.utm.medium.as_deref(), Some("email"));

        let stored = storage.events_for_url("abc123", 0, 10_000).await.unwrap();
        assert_eq!(stored, vec![event]);
    }

    #[tokio::test]
    async fn test_geo_failure_still_persists() {
        let (storage, _, recorder) = setup(FixedGeo(Err(())), false).await;

        let event = recorder.record("abc123", None, context()).await.unwrap();
        assert_eq!(event.geo, GeoInfo::default());
        assert_eq!(storage.events_for_url("abc123", 0, 10_000).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_anonymized_ip_is_stored() {
        let (_, _, recorder) = setup(FixedGeo(Ok(GeoInfo::default())), true).await;
        let event = recorder.record("abc123", None, context()).await.unwrap();
        assert_eq!(event.ip_address, "203.0.113.0");
    }

    #[tokio::test]
    async fn test_missing_url_is_not_recorded() {
        let (_, _, recorder) = setup(FixedGeo(Ok(GeoInfo::default())), false).await;
        let err = recorder.record("missing", None, context()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn test_publishes_to_url_and_owner_rooms() {
        let (_, broadcaster, recorder) = setup(FixedGeo(Ok(GeoInfo::default())), false).await;

        let (url_tx, mut url_rx) = mpsc::channel(4);
        let (user_tx, mut user_rx) = mpsc::channel(4);
        broadcaster.join(
            "url:abc123",
            Arc::new(ChannelConnection::new(broadcaster.next_connection_id(), url_tx)),
        );
        broadcaster.join(
            "user:u1",
            Arc::new(ChannelConnection::new(broadcaster.next_connection_id(), user_tx)),
        );

        let event = recorder.record("abc123", Some("u1"), context()).await.unwrap();

        for rx in [&mut url_rx, &mut user_rx] {
            let payload = rx.try_recv().unwrap();
            let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
            assert_eq!(value["type"], "event");
            assert_eq!(value["data"]["id"], event.id);
            assert!(rx.try_recv().is_err());
        }
    }
}
