use serde::Serialize;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status, always "ok" while the relay answers.
    pub status: String,
    /// Topics with at least one live subscriber.
    pub topics: usize,
    /// RFC 3339 start time of the relay.
    pub started_at: String,
}

impl HealthResponse {
    /// Healthy relay with `topics` live topics.
    pub fn ok(topics: usize, started_at: String) -> Self {
        Self {
            status: "ok".to_string(),
            topics,
            started_at,
        }
    }
}
