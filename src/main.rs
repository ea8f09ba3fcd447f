use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use linkpulse::analytics::{Aggregator, EventRecorder, GeoIpService, GeoLocator};
use linkpulse::api::{create_api_router, AppState};
use linkpulse::config::Config;
use linkpulse::realtime::{RealtimeState, RoomBroadcaster};
use linkpulse::redirect::{create_redirect_router, RedirectResolver, RedirectState, VisitDispatcher};
use linkpulse::shortener::Shortener;
use linkpulse::storage::{self, CachedStorage, Storage};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage = storage::open(&config.database).await?;
    info!("Database initialized successfully");

    let redirect_storage: Arc<dyn Storage> = if config.cache.max_entries > 0 {
        info!(
            max_entries = config.cache.max_entries,
            ttl_secs = config.cache.ttl_secs,
            "Redirect read cache enabled"
        );
        Arc::new(CachedStorage::new(
            Arc::clone(&storage),
            config.cache.max_entries,
            config.cache.ttl_secs,
        ))
    } else {
        Arc::clone(&storage)
    };

    let shortener = Arc::new(Shortener::new(
        redirect_storage,
        &config.redirect_base_url,
        config.short_id_length,
    )?);
    let broadcaster = Arc::new(RoomBroadcaster::new());

    let recorder = if config.analytics.enabled {
        let geo: Arc<dyn GeoLocator> = Arc::new(
            GeoIpService::new(config.analytics.geoip_city_db_path.as_deref())
                .context("Failed to initialize GeoIP")?,
        );
        if config.analytics.geoip_city_db_path.is_none() {
            info!("No GeoIP database configured, locations will be Unknown");
        }
        Some(Arc::new(EventRecorder::new(
            Arc::clone(&storage),
            geo,
            Arc::clone(&broadcaster),
            config.analytics.ip_anonymization,
        )))
    } else {
        info!("Analytics disabled, visits are counted but not recorded");
        None
    };

    let (dispatcher, dispatcher_handle) = VisitDispatcher::spawn(
        Arc::clone(&shortener),
        recorder,
        config.analytics.visit_queue_capacity,
    );

    let api_router = create_api_router(Arc::new(AppState {
        shortener: Arc::clone(&shortener),
        aggregator: Arc::new(Aggregator::new(Arc::clone(&storage))),
        realtime: RealtimeState {
            broadcaster,
            outbound_buffer: config.realtime.outbound_buffer,
        },
    }));
    let redirect_router = create_redirect_router(Arc::new(RedirectState {
        resolver: RedirectResolver::new(shortener),
        dispatcher,
        analytics: config.analytics.clone(),
        redirect_mode: config.redirect_status,
    }));

    let api_addr = config.api_server.addr();
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind API server to {api_addr}"))?;
    info!("API server listening on http://{}", api_addr);
    info!("   - Realtime endpoint at ws://{}/ws", api_addr);

    let redirect_addr = config.redirect_server.addr();
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr)
        .await
        .with_context(|| format!("Failed to bind redirect server to {redirect_addr}"))?;
    info!("Redirect server listening on http://{}", redirect_addr);
    info!("   - Short links look like {}/<id>", config.redirect_base_url);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for shutdown signal");
            // Keep the sender alive so the servers keep running
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    tokio::try_join!(
        axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for(shutdown_rx.clone())),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for(shutdown_rx)),
    )?;

    // Routers are gone, so is the last dispatcher handle: drain queued visits
    match tokio::time::timeout(DRAIN_TIMEOUT, dispatcher_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "Visit dispatcher task failed"),
        Err(_) => warn!("Timed out draining queued visits"),
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
