use dashmap::DashMap;
use tokio::sync::broadcast;

/// Per-topic broadcast hub used by the relay.
///
/// Frames are serialized once by the publisher and shared with every socket
/// subscribed to the topic.
pub struct TopicHub {
    topics: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl TopicHub {
    /// Construct an empty hub whose per-topic channels hold `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    /// Register a new receiver on `topic`, creating the channel on first use.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send a frame to every receiver of `topic`, returning how many got it.
    pub fn publish(&self, topic: &str, frame: String) -> usize {
        let delivered = match self.topics.get(topic) {
            Some(sender) => sender.send(frame).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            self.prune(topic);
        }
        delivered
    }

    /// Forget `topic` once nobody listens to it anymore.
    pub fn prune(&self, topic: &str) {
        self.topics
            .remove_if(topic, |_, sender| sender.receiver_count() == 0);
    }

    #[cfg(test)]
    pub(crate) fn contains_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Number of topics with at least one receiver.
    pub fn topic_count(&self) -> usize {
        self.topics
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .count()
    }
}
