use std::{net::SocketAddr, sync::Arc, time::Duration};

use courtside::{
    config::{RealtimeConfig, RelayConfig},
    dto::{realtime::MatchUpdate, score::MatchScoreDto},
    routes,
    services::{
        relay_service::publish_update,
        subscription_manager::{RealtimeError, SubscriptionManager},
        transport::{StaticToken, WebSocketConnector},
    },
    state::{AppState, SharedState, score::Side},
};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

async fn start_relay() -> (SharedState, SocketAddr) {
    let state = AppState::new(RelayConfig {
        subscriber_token: Some("viewer".into()),
        publisher_token: None,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (state, addr)
}

fn client(addr: SocketAddr, token: &str) -> SubscriptionManager {
    let url = format!("ws://{addr}/ws");
    let config = RealtimeConfig {
        url: url.clone(),
        reconnect_delay: Duration::from_millis(20),
        max_connect_attempts: 2,
        teardown_grace: Duration::from_millis(200),
        connect_timeout: Duration::from_secs(2),
    };
    SubscriptionManager::init(
        config,
        Arc::new(WebSocketConnector::new(url)),
        Arc::new(StaticToken(Some(token.to_string()))),
    )
}

#[tokio::test]
async fn published_scores_reach_websocket_subscribers() {
    let (state, addr) = start_relay().await;
    let manager = client(addr, "viewer");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _subscription = manager
        .subscribe("match/42", move |update| {
            let _ = tx.send(update);
        })
        .await
        .unwrap();

    let update = MatchUpdate {
        tournament_updated: true,
        winner: Some(Side::TeamB),
        score: MatchScoreDto::default(),
    };

    // The subscribe frame may still be in flight when the subscription resolves.
    let mut received = None;
    for _ in 0..100 {
        publish_update(&state, "42", &update).unwrap();
        if let Ok(Some(got)) = timeout(Duration::from_millis(50), rx.recv()).await {
            received = Some(got);
            break;
        }
    }

    assert_eq!(received, Some(update));
    manager.dispose().await;
}

#[tokio::test]
async fn rejected_credentials_exhaust_retries() {
    let (_state, addr) = start_relay().await;
    let manager = client(addr, "intruder");

    let result = manager.subscribe("match/42", |_| {}).await;

    assert!(matches!(
        result.err(),
        Some(RealtimeError::RetriesExhausted { attempts: 2, .. })
    ));
}
