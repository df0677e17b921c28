use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::RelayConfig,
    dto::realtime::{ClientFrame, MatchUpdate, ServerFrame},
    error::ServiceError,
    state::{SharedState, score::match_topic},
};

/// What a relay connection is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// May subscribe to topics.
    Subscriber,
    /// May subscribe and publish.
    Publisher,
}

/// Decide the role of a connection from the bearer token presented at upgrade.
pub fn authorize(config: &RelayConfig, token: Option<&str>) -> Result<ClientRole, ServiceError> {
    if let (Some(expected), Some(presented)) = (config.publisher_token.as_deref(), token) {
        if expected == presented {
            return Ok(ClientRole::Publisher);
        }
    }

    match config.subscriber_token.as_deref() {
        None => Ok(ClientRole::Subscriber),
        Some(expected) if token == Some(expected) => Ok(ClientRole::Subscriber),
        Some(_) => Err(ServiceError::Unauthorized(
            "missing or invalid bearer token".into(),
        )),
    }
}

/// Handle the full lifecycle of a relay WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, role: ClientRole) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id = Uuid::new_v4();
    info!(%connection_id, ?role, "relay client connected");
    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Subscribe { topic }) => {
                    if !forwarders.contains_key(&topic) {
                        let frames = state.hub().subscribe(&topic);
                        let task = spawn_forwarder(topic.clone(), frames, outbound_tx.clone());
                        forwarders.insert(topic.clone(), task);
                        debug!(%connection_id, topic = %topic, "relay client subscribed");
                    }
                }
                Ok(ClientFrame::Unsubscribe { topic }) => {
                    if let Some(task) = forwarders.remove(&topic) {
                        stop_forwarder(&state, &topic, task).await;
                        debug!(%connection_id, topic = %topic, "relay client unsubscribed");
                    }
                }
                Ok(ClientFrame::Publish { topic, payload }) => {
                    match publish_payload(&state, role, &topic, payload) {
                        Ok(delivered) => debug!(topic = %topic, delivered, "relayed update"),
                        Err(err) => {
                            warn!(%connection_id, topic = %topic, error = %err, "rejected publish");
                            send_error(&outbound_tx, err.to_string());
                        }
                    }
                }
                Ok(ClientFrame::Unknown) => debug!("ignoring unknown client frame"),
                Err(err) => {
                    warn!(%connection_id, error = %err, "failed to parse client frame");
                    send_error(&outbound_tx, format!("malformed frame: {err}"));
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    for (topic, task) in forwarders {
        stop_forwarder(&state, &topic, task).await;
    }
    info!(%connection_id, ?role, "relay client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Publish `update` to every subscriber of `match/{match_id}`.
///
/// Entry point for the persistence collaborator once a score is stored.
pub fn publish_update(
    state: &SharedState,
    match_id: &str,
    update: &MatchUpdate,
) -> Result<usize, ServiceError> {
    broadcast_update(state, &match_topic(match_id), update)
}

fn publish_payload(
    state: &SharedState,
    role: ClientRole,
    topic: &str,
    payload: Value,
) -> Result<usize, ServiceError> {
    if role != ClientRole::Publisher {
        return Err(ServiceError::Unauthorized(
            "publishing requires the publisher token".into(),
        ));
    }
    let update = serde_json::from_value::<MatchUpdate>(payload)
        .map_err(|err| ServiceError::InvalidInput(format!("malformed match update: {err}")))?;
    broadcast_update(state, topic, &update)
}

fn broadcast_update(
    state: &SharedState,
    topic: &str,
    update: &MatchUpdate,
) -> Result<usize, ServiceError> {
    let frame = serde_json::to_value(update)
        .map(|payload| ServerFrame::Message {
            topic: topic.to_owned(),
            payload,
        })
        .and_then(|frame| serde_json::to_string(&frame))
        .map_err(|err| ServiceError::Internal(format!("failed to serialize update: {err}")))?;
    Ok(state.hub().publish(topic, frame))
}

fn spawn_forwarder(
    topic: String,
    mut frames: broadcast::Receiver<String>,
    outbound: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    if outbound.send(Message::Text(frame.into())).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %topic, skipped, "relay client lagging; frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Abort a topic forwarder and drop the topic from the hub if it was the last listener.
async fn stop_forwarder(state: &SharedState, topic: &str, task: JoinHandle<()>) {
    task.abort();
    // The receiver is only released once the aborted task has been dropped.
    let _ = task.await;
    state.hub().prune(topic);
}

fn send_error(outbound: &mpsc::UnboundedSender<Message>, message: String) {
    match serde_json::to_string(&ServerFrame::Error { message }) {
        Ok(text) => {
            let _ = outbound.send(Message::Text(text.into()));
        }
        Err(err) => warn!(error = %err, "failed to serialize error frame"),
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dto::score::MatchScoreDto, state::AppState};

    fn relay(subscriber: Option<&str>, publisher: Option<&str>) -> RelayConfig {
        RelayConfig {
            subscriber_token: subscriber.map(str::to_owned),
            publisher_token: publisher.map(str::to_owned),
        }
    }

    #[test]
    fn open_relay_accepts_anonymous_subscribers() {
        let config = relay(None, Some("pub"));
        assert_eq!(authorize(&config, None).unwrap(), ClientRole::Subscriber);
        assert_eq!(authorize(&config, Some("pub")).unwrap(), ClientRole::Publisher);
        assert_eq!(authorize(&config, Some("guess")).unwrap(), ClientRole::Subscriber);
    }

    #[test]
    fn protected_relay_requires_a_token() {
        let config = relay(Some("sub"), None);
        assert!(matches!(authorize(&config, None), Err(ServiceError::Unauthorized(_))));
        assert!(authorize(&config, Some("nope")).is_err());
        assert_eq!(authorize(&config, Some("sub")).unwrap(), ClientRole::Subscriber);
    }

    #[tokio::test]
    async fn published_update_is_framed_for_the_match_topic() {
        let state = AppState::new(RelayConfig::default());
        let mut frames = state.hub().subscribe("match/42");
        let update = MatchUpdate {
            tournament_updated: true,
            winner: None,
            score: MatchScoreDto::default(),
        };

        assert_eq!(publish_update(&state, "42", &update).unwrap(), 1);

        let frame: ServerFrame = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        let ServerFrame::Message { topic, payload } = frame else {
            panic!("expected a message frame");
        };
        assert_eq!(topic, "match/42");
        assert_eq!(serde_json::from_value::<MatchUpdate>(payload).unwrap(), update);
    }

    #[test]
    fn subscribers_cannot_publish() {
        let state = AppState::new(RelayConfig::default());
        let result = publish_payload(
            &state,
            ClientRole::Subscriber,
            "match/1",
            serde_json::json!({"score": {}}),
        );
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));

        let result = publish_payload(
            &state,
            ClientRole::Publisher,
            "match/1",
            serde_json::json!({"score": "6-4"}),
        );
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn leaving_a_topic_removes_it_from_the_hub() {
        let state = AppState::new(relay(None, None));
        let (outbound, _writer) = mpsc::unbounded_channel();
        let frames = state.hub().subscribe("match/77");
        let task = spawn_forwarder("match/77".into(), frames, outbound);
        tokio::task::yield_now().await;

        stop_forwarder(&state, "match/77", task).await;

        assert!(!state.hub().contains_topic("match/77"));
        assert_eq!(state.hub().topic_count(), 0);
    }
}
