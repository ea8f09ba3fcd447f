//! Shared fixtures for integration tests.
#![allow(dead_code)]

use axum::{body::Body, http::Request, Router};
use linkpulse::analytics::{Aggregator, EventRecorder, GeoIpService};
use linkpulse::api::{create_api_router, AppState};
use linkpulse::config::{AnalyticsConfig, RedirectMode};
use linkpulse::realtime::{RealtimeState, RoomBroadcaster};
use linkpulse::redirect::{create_redirect_router, RedirectResolver, RedirectState, VisitDispatcher};
use linkpulse::shortener::Shortener;
use linkpulse::storage::{CachedStorage, SqliteStorage, Storage};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::Layer;

pub const BASE_URL: &str = "https://sho.rt";

/// Helper to create test storage
pub async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

pub struct TestApp {
    pub storage: Arc<dyn Storage>,
    pub shortener: Arc<Shortener>,
    pub broadcaster: Arc<RoomBroadcaster>,
    pub api: Router,
    pub redirect: Router,
}

pub struct TestOptions {
    pub analytics_enabled: bool,
    pub redirect_mode: RedirectMode,
    pub cache: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            analytics_enabled: true,
            redirect_mode: RedirectMode::Found,
            cache: false,
        }
    }
}

pub async fn test_app() -> TestApp {
    test_app_with(TestOptions::default()).await
}

pub async fn test_app_with(options: TestOptions) -> TestApp {
    let storage = create_test_storage().await;
    let lookup_storage: Arc<dyn Storage> = if options.cache {
        Arc::new(CachedStorage::new(storage.clone(), 1_000, 60))
    } else {
        storage.clone()
    };
    let shortener = Arc::new(Shortener::new(lookup_storage, BASE_URL, 6).unwrap());
    let broadcaster = Arc::new(RoomBroadcaster::new());

    let recorder = options.analytics_enabled.then(|| {
        Arc::new(EventRecorder::new(
            storage.clone(),
            Arc::new(GeoIpService::new(None).unwrap()),
            broadcaster.clone(),
            false,
        ))
    });
    let (dispatcher, _handle) = VisitDispatcher::spawn(shortener.clone(), recorder, 1_000);

    let api = create_api_router(Arc::new(AppState {
        shortener: shortener.clone(),
        aggregator: Arc::new(Aggregator::new(storage.clone())),
        realtime: RealtimeState {
            broadcaster: broadcaster.clone(),
            outbound_buffer: 64,
        },
    }));
    let redirect = create_redirect_router(Arc::new(RedirectState {
        resolver: RedirectResolver::new(shortener.clone()),
        dispatcher,
        analytics: AnalyticsConfig {
            enabled: options.analytics_enabled,
            ..AnalyticsConfig::default()
        },
        redirect_mode: options.redirect_mode,
    }));

    TestApp {
        storage,
        shortener,
        broadcaster,
        api,
        redirect,
    }
}

/// Serve `router` on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
pub struct TestConnectInfoLayer;

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct TestConnectInfoMiddleware<S> {
    inner: S,
}

impl<S> tower::Service<Request<Body>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<Body>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let addr = SocketAddr::from(([203, 0, 113, 7], 12345));
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(addr));
        self.inner.call(req)
    }
}
