use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};

use crate::{error::AppError, services::relay_service, state::SharedState};

/// Upgrade the HTTP connection into a relay WebSocket session after checking the bearer token.
pub async fn ws_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let role = relay_service::authorize(state.relay_config(), bearer_token(&headers))?;
    Ok(ws.on_upgrade(move |socket| relay_service::handle_socket(state, socket, role)))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
