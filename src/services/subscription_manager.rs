//! Per-topic subscriptions multiplexed over a single realtime connection.
//!
//! [`SubscriptionManager::init`] spawns one actor task that owns the
//! connection and the subscriber table. Every mutation (subscribe,
//! unsubscribe, teardown timer, reconnect) goes through its command channel, so a
//! deferred teardown can never race a resubscribe.
//!
//! Lifecycle of the connection:
//! - opened lazily by the first subscribe,
//! - re-opened after a drop with a fixed delay, re-subscribing every live topic,
//! - abandoned after `max_connect_attempts` consecutive failures, failing every topic once,
//! - closed `teardown_grace` after the last subscriber left, unless someone subscribes again.

use std::{
    future::pending,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::{Instant, sleep_until, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::RealtimeConfig,
    dto::realtime::{ClientFrame, MatchUpdate, ServerFrame},
    services::transport::{Connector, TokenProvider, Transport, TransportError},
};

type SubscriberId = u64;
type Ack = oneshot::Sender<Result<(), RealtimeError>>;
type ConnectFuture = BoxFuture<'static, Result<Box<dyn Transport>, TransportError>>;

/// Errors surfaced to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// The manager was disposed.
    #[error("subscription manager disposed")]
    Disposed,
    /// The connection could not be (re-)established.
    #[error("realtime connection failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// Consecutive failed attempts.
        attempts: u32,
        /// Last connection error.
        reason: String,
    },
}

/// State of the shared connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection and nobody subscribed.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected; every live topic is subscribed.
    Connected,
    /// Waiting before connection attempt number `attempt`.
    Reconnecting {
        /// Number of the next attempt.
        attempt: u32,
    },
    /// Retries were exhausted and every topic was failed.
    Failed,
    /// The manager was disposed.
    Disposed,
}

/// Published once per topic when retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFailure {
    /// Topic whose subscribers were dropped.
    pub topic: String,
    /// Consecutive failed attempts.
    pub attempts: u32,
    /// Last connection error.
    pub reason: String,
}

enum Command {
    Subscribe {
        topic: String,
        entry: SubscriberEntry,
        ack: Ack,
    },
    Unsubscribe {
        topic: String,
        id: SubscriberId,
    },
    Dispose {
        done: oneshot::Sender<()>,
    },
}

struct SubscriberEntry {
    id: SubscriberId,
    deliveries: mpsc::UnboundedSender<MatchUpdate>,
    active: Arc<AtomicBool>,
}

/// Cloneable handle on the shared realtime connection.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    failures: broadcast::Sender<TopicFailure>,
    status: watch::Receiver<ConnectionStatus>,
}

impl SubscriptionManager {
    /// Spawn the connection actor. Must be called from within a Tokio runtime.
    ///
    /// No connection is opened until the first subscribe.
    pub fn init(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (failures, _receiver) = broadcast::channel(64);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);

        let actor = ConnectionActor {
            config,
            connector,
            tokens,
            commands: commands_rx,
            failures: failures.clone(),
            status: status_tx,
            topics: IndexMap::new(),
            transport: None,
            connecting: None,
            waiting: Vec::new(),
            attempts: 0,
            retry_at: None,
            teardown_at: None,
        };
        tokio::spawn(actor.run());

        Self {
            inner: Arc::new(ManagerInner {
                commands: commands_tx,
                next_id: AtomicU64::new(1),
                failures,
                status: status_rx,
            }),
        }
    }

    /// Subscribe `on_message` to `topic`, connecting first if needed.
    ///
    /// Resolves once the topic is live on the connection. `on_message` runs on its
    /// own task, receives messages in transport order and only ever sees payloads
    /// that parsed as a [`MatchUpdate`].
    pub async fn subscribe<F>(
        &self,
        topic: impl Into<String>,
        mut on_message: F,
    ) -> Result<Subscription, RealtimeError>
    where
        F: FnMut(MatchUpdate) + Send + 'static,
    {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let (deliveries, mut inbox) = mpsc::unbounded_channel::<MatchUpdate>();

        let forwarding = Arc::clone(&active);
        tokio::spawn(async move {
            while let Some(update) = inbox.recv().await {
                if !forwarding.load(Ordering::Acquire) {
                    break;
                }
                on_message(update);
            }
        });

        let (ack, acked) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Subscribe {
                topic: topic.clone(),
                entry: SubscriberEntry {
                    id,
                    deliveries,
                    active: Arc::clone(&active),
                },
                ack,
            })
            .map_err(|_| RealtimeError::Disposed)?;

        // Built before waiting so that a cancelled subscribe still unregisters.
        let subscription = Subscription {
            id,
            topic,
            active,
            commands: self.inner.commands.clone(),
        };

        match acked.await {
            Ok(Ok(())) => Ok(subscription),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(RealtimeError::Disposed),
        }
    }

    /// Receiver of per-topic failures raised when retries are exhausted.
    pub fn failures(&self) -> broadcast::Receiver<TopicFailure> {
        self.inner.failures.subscribe()
    }

    /// Watch the state of the shared connection.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.clone()
    }

    /// Close the connection and deactivate every subscription.
    ///
    /// Later subscribes fail with [`RealtimeError::Disposed`].
    pub async fn dispose(&self) {
        let (done, finished) = oneshot::channel();
        if self.inner.commands.send(Command::Dispose { done }).is_ok() {
            let _ = finished.await;
        }
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    topic: String,
    active: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// Topic this subscription listens to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// False once unsubscribed, failed or disposed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop receiving messages. Calling it again, or after the connection is gone, is a no-op.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Unsubscribe {
                topic: self.topic.clone(),
                id: self.id,
            });
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct ConnectionActor {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    commands: mpsc::UnboundedReceiver<Command>,
    failures: broadcast::Sender<TopicFailure>,
    status: watch::Sender<ConnectionStatus>,
    topics: IndexMap<String, Vec<SubscriberEntry>>,
    transport: Option<Box<dyn Transport>>,
    connecting: Option<ConnectFuture>,
    /// Subscribers waiting for the connection to come up.
    waiting: Vec<Ack>,
    /// Consecutive failed connection attempts.
    attempts: u32,
    retry_at: Option<Instant>,
    teardown_at: Option<Instant>,
}

impl ConnectionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Subscribe { topic, entry, ack }) => {
                        self.subscribe(topic, entry, ack).await;
                    }
                    Some(Command::Unsubscribe { topic, id }) => self.unsubscribe(&topic, id).await,
                    Some(Command::Dispose { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                outcome = connect_outcome(&mut self.connecting) => {
                    self.connecting = None;
                    self.connected(outcome).await;
                }
                frame = next_frame(&mut self.transport) => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(err)) => self.connection_lost(&err.to_string()),
                    None => self.connection_lost("closed by peer"),
                },
                _ = deadline(self.retry_at) => {
                    self.retry_at = None;
                    self.start_connect();
                }
                _ = deadline(self.teardown_at) => {
                    self.teardown_at = None;
                    self.teardown().await;
                }
            }
        }
        debug!("realtime connection actor stopped");
    }

    async fn subscribe(&mut self, topic: String, entry: SubscriberEntry, ack: Ack) {
        self.teardown_at = None;

        let first_subscriber = !self.topics.contains_key(&topic);
        self.topics.entry(topic.clone()).or_default().push(entry);
        debug!(topic = %topic, first_subscriber, "subscriber added");

        if first_subscriber && self.transport.is_some() {
            self.send_frame(ClientFrame::Subscribe { topic }).await;
        }

        if self.transport.is_some() {
            let _ = ack.send(Ok(()));
        } else {
            self.waiting.push(ack);
            if self.connecting.is_none() && self.retry_at.is_none() {
                self.start_connect();
            }
        }
    }

    async fn unsubscribe(&mut self, topic: &str, id: SubscriberId) {
        let Some(entries) = self.topics.get_mut(topic) else {
            return;
        };
        entries.retain(|entry| entry.id != id);
        if !entries.is_empty() {
            return;
        }

        self.topics.shift_remove(topic);
        debug!(topic = %topic, "last subscriber of topic left");
        if self.transport.is_some() {
            self.send_frame(ClientFrame::Unsubscribe {
                topic: topic.to_owned(),
            })
            .await;
        }

        if self.topics.is_empty() {
            if self.transport.is_some() {
                self.teardown_at = Some(Instant::now() + self.config.teardown_grace);
            } else {
                // Nobody is waiting for the connection anymore.
                self.connecting = None;
                self.retry_at = None;
                self.attempts = 0;
                self.waiting.clear();
                self.set_status(ConnectionStatus::Idle);
            }
        }
    }

    fn start_connect(&mut self) {
        let connector = Arc::clone(&self.connector);
        let tokens = Arc::clone(&self.tokens);
        let limit = self.config.connect_timeout;

        self.connecting = Some(Box::pin(async move {
            let token = tokens.bearer_token().await;
            timeout(limit, connector.connect(token))
                .await
                .unwrap_or(Err(TransportError::Timeout))
        }));
        self.set_status(ConnectionStatus::Connecting);
    }

    async fn connected(&mut self, outcome: Result<Box<dyn Transport>, TransportError>) {
        let mut transport = match outcome {
            Ok(transport) => transport,
            Err(err) => {
                self.connect_failed(err);
                return;
            }
        };

        if self.topics.is_empty() {
            let _ = transport.close().await;
            self.attempts = 0;
            self.set_status(ConnectionStatus::Idle);
            return;
        }

        self.transport = Some(transport);
        self.attempts = 0;

        let topics = self.topics.keys().cloned().collect::<Vec<_>>();
        info!(topics = topics.len(), "realtime connection established");
        for topic in topics {
            if !self.send_frame(ClientFrame::Subscribe { topic }).await {
                return;
            }
        }

        self.set_status(ConnectionStatus::Connected);
        for ack in self.waiting.drain(..) {
            let _ = ack.send(Ok(()));
        }
    }

    fn connect_failed(&mut self, err: TransportError) {
        if self.topics.is_empty() {
            self.attempts = 0;
            self.set_status(ConnectionStatus::Idle);
            return;
        }

        self.attempts += 1;
        if self.attempts >= self.config.max_connect_attempts {
            self.give_up(err.to_string());
            return;
        }

        warn!(
            attempt = self.attempts,
            error = %err,
            delay_ms = self.config.reconnect_delay.as_millis() as u64,
            "realtime connection attempt failed; retrying"
        );
        self.retry_at = Some(Instant::now() + self.config.reconnect_delay);
        self.set_status(ConnectionStatus::Reconnecting {
            attempt: self.attempts + 1,
        });
    }

    fn give_up(&mut self, reason: String) {
        let attempts = self.attempts;
        error!(attempts, error = %reason, "realtime connection retries exhausted");

        for (topic, entries) in self.topics.drain(..) {
            for entry in &entries {
                entry.active.store(false, Ordering::Release);
            }
            let _ = self.failures.send(TopicFailure {
                topic,
                attempts,
                reason: reason.clone(),
            });
        }
        for ack in self.waiting.drain(..) {
            let _ = ack.send(Err(RealtimeError::RetriesExhausted {
                attempts,
                reason: reason.clone(),
            }));
        }

        self.attempts = 0;
        self.set_status(ConnectionStatus::Failed);
    }

    fn connection_lost(&mut self, reason: &str) {
        self.transport = None;
        self.teardown_at = None;

        if self.topics.is_empty() {
            self.set_status(ConnectionStatus::Idle);
            return;
        }

        warn!(
            reason,
            topics = self.topics.len(),
            "realtime connection lost; reconnecting"
        );
        self.attempts = 0;
        self.retry_at = Some(Instant::now() + self.config.reconnect_delay);
        self.set_status(ConnectionStatus::Reconnecting { attempt: 1 });
    }

    /// Send a frame, treating a send failure as a lost connection. Returns whether
    /// the connection is still up.
    async fn send_frame(&mut self, frame: ClientFrame) -> bool {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(err) => {
                error!(error = %err, "failed to serialize realtime frame");
                return self.transport.is_some();
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send(text).await {
            Ok(()) => true,
            Err(err) => {
                self.connection_lost(&err.to_string());
                false
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let frame = match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed realtime frame");
                return;
            }
        };

        match frame {
            ServerFrame::Message { topic, payload } => {
                let update = match serde_json::from_value::<MatchUpdate>(payload) {
                    Ok(update) => update,
                    Err(err) => {
                        warn!(topic = %topic, error = %err, "dropping malformed realtime payload");
                        return;
                    }
                };
                let Some(entries) = self.topics.get(&topic) else {
                    debug!(topic = %topic, "message for a topic without subscribers");
                    return;
                };
                for entry in entries {
                    if entry.active.load(Ordering::Acquire) {
                        let _ = entry.deliveries.send(update.clone());
                    }
                }
            }
            ServerFrame::Error { message } => warn!(message = %message, "relay reported an error"),
            ServerFrame::Unknown => debug!("ignoring unknown realtime frame"),
        }
    }

    async fn teardown(&mut self) {
        if !self.topics.is_empty() {
            return;
        }
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
            info!("no subscribers left; realtime connection closed");
        }
        self.set_status(ConnectionStatus::Idle);
    }

    async fn shutdown(&mut self) {
        self.connecting = None;
        self.retry_at = None;
        self.teardown_at = None;

        for (_, entries) in self.topics.drain(..) {
            for entry in &entries {
                entry.active.store(false, Ordering::Release);
            }
        }
        for ack in self.waiting.drain(..) {
            let _ = ack.send(Err(RealtimeError::Disposed));
        }
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }
        self.set_status(ConnectionStatus::Disposed);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn connect_outcome(
    connecting: &mut Option<ConnectFuture>,
) -> Result<Box<dyn Transport>, TransportError> {
    match connecting {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_frame(
    transport: &mut Option<Box<dyn Transport>>,
) -> Option<Result<String, TransportError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
        time::Duration,
    };

    use super::*;
    use crate::{
        dto::score::{MatchScoreDto, SetScoreDto},
        services::transport::StaticToken,
    };

    #[derive(Default)]
    struct RelayState {
        connects: usize,
        closes: usize,
        fail_next: usize,
        tokens: Vec<Option<String>>,
        next_link: usize,
        links: HashMap<usize, Link>,
    }

    struct Link {
        topics: HashSet<String>,
        outbound: mpsc::UnboundedSender<String>,
    }

    /// In-memory relay honouring subscribe/unsubscribe frames.
    #[derive(Clone, Default)]
    pub(crate) struct MockRelay {
        state: Arc<Mutex<RelayState>>,
    }

    impl MockRelay {
        pub(crate) fn connector(&self) -> Arc<dyn Connector> {
            Arc::new(self.clone())
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
            self.state.lock().unwrap()
        }

        fn connects(&self) -> usize {
            self.lock().connects
        }

        fn closes(&self) -> usize {
            self.lock().closes
        }

        fn fail_next(&self, count: usize) {
            self.lock().fail_next = count;
        }

        fn subscribed(&self, topic: &str) -> bool {
            self.lock()
                .links
                .values()
                .any(|link| link.topics.contains(topic))
        }

        /// Cut every live connection as if the network dropped.
        fn drop_connections(&self) {
            self.lock().links.clear();
        }

        fn send_raw(&self, topic: &str, text: &str) {
            for link in self.lock().links.values() {
                if link.topics.contains(topic) {
                    let _ = link.outbound.send(text.to_owned());
                }
            }
        }

        pub(crate) fn publish(&self, topic: &str, update: &MatchUpdate) {
            let frame = ServerFrame::Message {
                topic: topic.to_owned(),
                payload: serde_json::to_value(update).unwrap(),
            };
            self.send_raw(topic, &serde_json::to_string(&frame).unwrap());
        }
    }

    impl Connector for MockRelay {
        fn connect(
            &self,
            token: Option<String>,
        ) -> BoxFuture<'static, Result<Box<dyn Transport>, TransportError>> {
            let relay = self.clone();
            Box::pin(async move {
                let mut state = relay.lock();
                state.connects += 1;
                state.tokens.push(token);
                if state.fail_next > 0 {
                    state.fail_next -= 1;
                    return Err(TransportError::Protocol("relay unreachable".into()));
                }

                let (outbound, inbox) = mpsc::unbounded_channel();
                let id = state.next_link;
                state.next_link += 1;
                state.links.insert(
                    id,
                    Link {
                        topics: HashSet::new(),
                        outbound,
                    },
                );
                drop(state);

                Ok(Box::new(MockTransport {
                    id,
                    relay: relay.clone(),
                    inbox,
                }) as Box<dyn Transport>)
            })
        }
    }

    struct MockTransport {
        id: usize,
        relay: MockRelay,
        inbox: mpsc::UnboundedReceiver<String>,
    }

    impl Transport for MockTransport {
        fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async move {
                let mut state = self.relay.lock();
                let link = state.links.get_mut(&self.id).ok_or(TransportError::Closed)?;
                match serde_json::from_str::<ClientFrame>(&frame) {
                    Ok(ClientFrame::Subscribe { topic }) => {
                        link.topics.insert(topic);
                    }
                    Ok(ClientFrame::Unsubscribe { topic }) => {
                        link.topics.remove(&topic);
                    }
                    other => panic!("unexpected client frame: {other:?}"),
                }
                Ok::<_, TransportError>(())
            })
        }

        fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>> {
            Box::pin(async move { self.inbox.recv().await.map(Ok::<_, TransportError>) })
        }

        fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async move {
                let mut state = self.relay.lock();
                state.links.remove(&self.id);
                state.closes += 1;
                Ok::<_, TransportError>(())
            })
        }
    }

    pub(crate) fn fast_config() -> RealtimeConfig {
        RealtimeConfig {
            url: "ws://relay.test/ws".into(),
            reconnect_delay: Duration::from_millis(20),
            max_connect_attempts: 3,
            teardown_grace: Duration::from_millis(150),
            connect_timeout: Duration::from_secs(1),
        }
    }

    fn manager(relay: &MockRelay, config: RealtimeConfig) -> SubscriptionManager {
        SubscriptionManager::init(
            config,
            relay.connector(),
            Arc::new(StaticToken(Some("referee-token".into()))),
        )
    }

    fn update(games_a: u32) -> MatchUpdate {
        MatchUpdate {
            tournament_updated: false,
            winner: None,
            score: MatchScoreDto {
                sets: vec![SetScoreDto {
                    team_a_score: games_a,
                    ..SetScoreDto::default()
                }],
                ..MatchScoreDto::default()
            },
        }
    }

    fn recorder() -> (
        Arc<Mutex<Vec<MatchUpdate>>>,
        impl FnMut(MatchUpdate) + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |update| sink.lock().unwrap().push(update))
    }

    pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..300 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn every_subscriber_of_a_topic_receives_each_message() {
        let relay = MockRelay::default();
        let manager = manager(&relay, fast_config());
        let (seen_a, on_a) = recorder();
        let (seen_b, on_b) = recorder();

        let sub_a = manager.subscribe("match/42", on_a).await.unwrap();
        let _sub_b = manager.subscribe("match/42", on_b).await.unwrap();

        relay.publish("match/42", &update(1));
        eventually(|| seen_a.lock().unwrap().len() == 1 && seen_b.lock().unwrap().len() == 1).await;

        sub_a.unsubscribe();
        relay.publish("match/42", &update(2));
        eventually(|| seen_b.lock().unwrap().len() == 2).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(seen_a.lock().unwrap().as_slice(), &[update(1)]);
        assert_eq!(seen_b.lock().unwrap().as_slice(), &[update(1), update(2)]);
        assert!(relay.subscribed("match/42"));
    }

    #[tokio::test]
    async fn one_connection_serves_every_topic() {
        let relay = MockRelay::default();
        let manager = manager(&relay, fast_config());

        let _first = manager.subscribe("match/1", |_| {}).await.unwrap();
        let _second = manager.subscribe("match/2", |_| {}).await.unwrap();

        assert_eq!(relay.connects(), 1);
        assert!(relay.subscribed("match/1"));
        assert!(relay.subscribed("match/2"));
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Connected);
        assert_eq!(relay.lock().tokens, vec![Some("referee-token".to_string())]);
    }

    #[tokio::test]
    async fn reconnect_resubscribes_live_topics() {
        let relay = MockRelay::default();
        let manager = manager(&relay, fast_config());
        let (seen, on_message) = recorder();
        let _sub = manager.subscribe("match/7", on_message).await.unwrap();

        relay.drop_connections();
        eventually(|| relay.connects() == 2 && relay.subscribed("match/7")).await;

        relay.publish("match/7", &update(3));
        eventually(|| seen.lock().unwrap().len() == 1).await;
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn resubscribing_within_grace_reuses_the_connection() {
        let relay = MockRelay::default();
        let manager = manager(&relay, fast_config());

        let first = manager.subscribe("match/3", |_| {}).await.unwrap();
        drop(first);
        let _again = manager.subscribe("match/3", |_| {}).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(relay.connects(), 1);
        assert_eq!(relay.closes(), 0);
        assert!(relay.subscribed("match/3"));
    }

    #[tokio::test]
    async fn connection_closes_after_grace_without_subscribers() {
        let relay = MockRelay::default();
        let manager = manager(&relay, fast_config());

        let sub = manager.subscribe("match/3", |_| {}).await.unwrap();
        sub.unsubscribe();

        eventually(|| relay.closes() == 1).await;
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let relay = MockRelay::default();
        let manager = manager(&relay, fast_config());
        let (seen, on_message) = recorder();

        let sub = manager.subscribe("match/9", |_| {}).await.unwrap();
        let _other = manager.subscribe("match/9", on_message).await.unwrap();

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());

        relay.publish("match/9", &update(4));
        eventually(|| seen.lock().unwrap().len() == 1).await;

        manager.dispose().await;
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn malformed_payloads_never_reach_subscribers() {
        let relay = MockRelay::default();
        let manager = manager(&relay, fast_config());
        let (seen, on_message) = recorder();
        let _sub = manager.subscribe("match/5", on_message).await.unwrap();

        relay.send_raw("match/5", "not json at all");
        relay.send_raw(
            "match/5",
            r#"{"type":"message","topic":"match/5","payload":{"score":"6-4"}}"#,
        );
        relay.publish("match/5", &update(6));

        eventually(|| !seen.lock().unwrap().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[update(6)]);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_each_topic_once() {
        let relay = MockRelay::default();
        relay.fail_next(usize::MAX);
        let manager = manager(&relay, fast_config());
        let mut failures = manager.failures();

        let (first, second) = tokio::join!(
            manager.subscribe("match/1", |_| {}),
            manager.subscribe("match/2", |_| {}),
        );

        for result in [first.err(), second.err()] {
            assert!(matches!(
                result,
                Some(RealtimeError::RetriesExhausted { attempts: 3, .. })
            ));
        }

        let mut topics = vec![
            failures.recv().await.unwrap().topic,
            failures.recv().await.unwrap().topic,
        ];
        topics.sort();
        assert_eq!(topics, vec!["match/1".to_string(), "match/2".to_string()]);
        assert!(failures.try_recv().is_err());
        assert_eq!(relay.connects(), 3);
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Failed);
    }

    #[tokio::test]
    async fn transient_failures_are_invisible_to_subscribers() {
        let relay = MockRelay::default();
        relay.fail_next(2);
        let manager = manager(&relay, fast_config());

        let sub = manager.subscribe("match/11", |_| {}).await;
        assert!(sub.is_ok());
        assert_eq!(relay.connects(), 3);
    }

    #[tokio::test]
    async fn disposed_manager_rejects_subscribers() {
        let relay = MockRelay::default();
        let manager = manager(&relay, fast_config());
        let sub = manager.subscribe("match/1", |_| {}).await.unwrap();

        manager.dispose().await;

        assert!(!sub.is_active());
        assert_eq!(relay.closes(), 1);
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Disposed);
        assert_eq!(
            manager.subscribe("match/1", |_| {}).await.err(),
            Some(RealtimeError::Disposed)
        );
    }
}
