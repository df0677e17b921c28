use crate::{
    dto::{format_system_time, health::HealthResponse},
    state::SharedState,
};

/// Report relay liveness together with the number of live topics.
pub fn health_status(state: &SharedState) -> HealthResponse {
    HealthResponse::ok(
        state.hub().topic_count(),
        format_system_time(state.started_at()),
    )
}
