//! Realtime integration tests over real sockets
//!
//! A dashboard subscribes over `/ws`, a redirect happens, the dashboard gets
//! exactly one event. Also covers the reconnecting client against a live server.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{eventually, serve, test_app, TestApp, TestConnectInfoLayer};
use futures_util::{SinkExt, StreamExt};
use linkpulse::analytics::TimeRange;
use linkpulse::realtime::{BackoffPolicy, ClientConfig, ClientUpdate, RealtimeClient};
use linkpulse::shortener::CreateOptions;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower::ServiceExt;

async fn create_slug(app: &TestApp, slug: &str, owner: Option<&str>) {
    app.shortener
        .create(
            "https://example.com",
            CreateOptions {
                custom_slug: Some(slug.to_string()),
                expires_at: None,
                owner_id: owner.map(str::to_string),
            },
        )
        .await
        .unwrap();
}

async fn redirect(app: &TestApp, slug: &str) {
    let response = app
        .redirect
        .clone()
        .layer(TestConnectInfoLayer)
        .oneshot(
            Request::builder()
                .uri(format!("/{slug}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
}

async fn wait_for_members(app: &TestApp, room: &str, count: usize) {
    let broadcaster = app.broadcaster.clone();
    let room = room.to_string();
    assert!(
        eventually(|| {
            let broadcaster = broadcaster.clone();
            let room = room.clone();
            async move { broadcaster.member_count(&room) == count }
        })
        .await,
        "room {room} should reach {count} members"
    );
}

async fn next_update(rx: &mut mpsc::Receiver<ClientUpdate>) -> ClientUpdate {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("update should arrive")
        .expect("channel open")
}

#[tokio::test]
async fn test_subscriber_receives_exactly_one_event() {
    let app = test_app().await;
    create_slug(&app, "abc123", None).await;
    let addr = serve(app.api.clone()).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
        .send(Message::Text(
            r#"{"type":"subscribe","room":"url:abc123"}"#.to_string(),
        ))
        .await
        .unwrap();
    wait_for_members(&app, "url:abc123", 1).await;

    redirect(&app, "abc123").await;

    let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("event should arrive")
        .unwrap()
        .unwrap();
    let text = match message {
        Message::Text(text) => text,
        other => panic!("expected a text frame, got {other:?}"),
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "event");
    assert_eq!(value["data"]["shortId"], "abc123");

    let extra = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(extra.is_err(), "only one event expected");
}

#[tokio::test]
async fn test_owner_room_and_unrelated_rooms() {
    let app = test_app().await;
    create_slug(&app, "mine", Some("alice")).await;
    create_slug(&app, "other", None).await;
    let addr = serve(app.api.clone()).await;

    let (mut owner_socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    owner_socket
        .send(Message::Text(
            r#"{"type":"subscribe","room":"user:alice"}"#.to_string(),
        ))
        .await
        .unwrap();
    wait_for_members(&app, "user:alice", 1).await;

    redirect(&app, "other").await;
    redirect(&app, "mine").await;

    let message = tokio::time::timeout(Duration::from_secs(2), owner_socket.next())
        .await
        .expect("event should arrive")
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
    assert_eq!(value["data"]["shortId"], "mine");
}

#[tokio::test]
async fn test_unknown_messages_are_ignored_and_unsubscribe_works() {
    let app = test_app().await;
    let addr = serve(app.api.clone()).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    for text in [
        r#"{"type":"ping"}"#,
        "not json at all",
        r#"{"type":"subscribe","room":"admin:everything"}"#,
        r#"{"type":"subscribe","room":"url:abc123"}"#,
    ] {
        socket.send(Message::Text(text.to_string())).await.unwrap();
    }
    wait_for_members(&app, "url:abc123", 1).await;
    assert_eq!(app.broadcaster.room_count(), 1);

    socket
        .send(Message::Text(
            r#"{"type":"unsubscribe","room":"url:abc123"}"#.to_string(),
        ))
        .await
        .unwrap();
    wait_for_members(&app, "url:abc123", 0).await;
    assert_eq!(app.broadcaster.room_count(), 0);
}

#[tokio::test]
async fn test_disconnect_leaves_all_rooms() {
    let app = test_app().await;
    let addr = serve(app.api.clone()).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    for room in ["url:a", "url:b", "user:alice"] {
        socket
            .send(Message::Text(format!(
                r#"{{"type":"subscribe","room":"{room}"}}"#
            )))
            .await
            .unwrap();
    }
    wait_for_members(&app, "user:alice", 1).await;
    assert_eq!(app.broadcaster.room_count(), 3);

    socket.close(None).await.unwrap();
    drop(socket);

    let broadcaster = app.broadcaster.clone();
    assert!(
        eventually(|| {
            let broadcaster = broadcaster.clone();
            async move { broadcaster.room_count() == 0 }
        })
        .await
    );
}

#[tokio::test]
async fn test_pong_follows_earlier_subscriptions() {
    let app = test_app().await;
    let addr = serve(app.api.clone()).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    for room in ["url:a", "user:alice"] {
        socket
            .send(Message::Text(format!(
                r#"{{"type":"subscribe","room":"{room}"}}"#
            )))
            .await
            .unwrap();
    }
    socket.send(Message::Ping(b"mark".to_vec())).await.unwrap();

    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("pong should arrive")
            .unwrap()
            .unwrap();
        if let Message::Pong(payload) = message {
            assert_eq!(payload, b"mark");
            break;
        }
    }
    // No waiting: both joins happened before the pong went out
    assert_eq!(app.broadcaster.member_count("url:a"), 1);
    assert_eq!(app.broadcaster.member_count("user:alice"), 1);
}

#[tokio::test]
async fn test_realtime_client_misses_no_visit_while_subscribing() {
    let app = test_app().await;
    create_slug(&app, "race", None).await;
    let addr = serve(app.api.clone()).await;

    let client = RealtimeClient::new(ClientConfig {
        ws_url: format!("ws://{addr}/ws"),
        api_base_url: format!("http://{addr}"),
        rooms: vec!["url:race".to_string()],
        time_range: TimeRange::Day,
        backoff: BackoffPolicy::default(),
        poll_interval: Duration::from_secs(60),
    });
    let (tx, mut rx) = mpsc::channel(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run(tx, shutdown_rx).await })
    };

    assert_eq!(next_update(&mut rx).await, ClientUpdate::Connected);
    // Lands anywhere between the connect, the subscribe and the backfill
    redirect(&app, "race").await;

    let mut pushed = 0;
    let backfilled = loop {
        match next_update(&mut rx).await {
            ClientUpdate::Event(event) => {
                assert_eq!(event.short_id, "race");
                pushed += 1;
            }
            ClientUpdate::Stats { stats, .. } => break stats.total_visits,
            other => panic!("expected stats backfill, got {other:?}"),
        }
    };
    if backfilled == 0 && pushed == 0 {
        match next_update(&mut rx).await {
            ClientUpdate::Event(event) => assert_eq!(event.short_id, "race"),
            other => panic!("visit in neither backfill nor stream, got {other:?}"),
        }
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_realtime_client_backfills_then_streams() {
    let app = test_app().await;
    create_slug(&app, "live", None).await;
    let addr = serve(app.api.clone()).await;

    let client = RealtimeClient::new(ClientConfig {
        ws_url: format!("ws://{addr}/ws"),
        api_base_url: format!("http://{addr}"),
        rooms: vec!["url:live".to_string()],
        time_range: TimeRange::Day,
        backoff: BackoffPolicy {
            base: Duration::from_millis(10),
            max_attempts: 3,
        },
        poll_interval: Duration::from_secs(60),
    });
    let (tx, mut rx) = mpsc::channel(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run(tx, shutdown_rx).await })
    };

    assert_eq!(next_update(&mut rx).await, ClientUpdate::Connected);
    assert!(client.is_connected());
    match next_update(&mut rx).await {
        ClientUpdate::Stats { room, stats } => {
            assert_eq!(room, "url:live");
            assert_eq!(stats.total_visits, 0);
        }
        other => panic!("expected stats backfill, got {other:?}"),
    }

    wait_for_members(&app, "url:live", 1).await;
    redirect(&app, "live").await;

    match next_update(&mut rx).await {
        ClientUpdate::Event(event) => assert_eq!(event.short_id, "live"),
        other => panic!("expected event, got {other:?}"),
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
    assert!(!client.is_connected());
}
