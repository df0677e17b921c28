mod hub;
pub mod score;
pub mod state_machine;

use std::{sync::Arc, time::SystemTime};

use crate::config::RelayConfig;

pub use self::hub::TopicHub;

pub type SharedState = Arc<AppState>;

/// Frames buffered per topic before a slow socket starts losing them.
const TOPIC_CAPACITY: usize = 64;

/// Shared state of the realtime relay.
pub struct AppState {
    hub: TopicHub,
    relay: RelayConfig,
    started_at: SystemTime,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(relay: RelayConfig) -> SharedState {
        Arc::new(Self {
            hub: TopicHub::new(TOPIC_CAPACITY),
            relay,
            started_at: SystemTime::now(),
        })
    }

    /// Per-topic fan-out hub.
    pub fn hub(&self) -> &TopicHub {
        &self.hub
    }

    /// Credentials accepted by the relay.
    pub fn relay_config(&self) -> &RelayConfig {
        &self.relay
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }
}
