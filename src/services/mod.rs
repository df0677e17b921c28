/// Health check service.
pub mod health_service;
/// WebSocket relay fan-out.
pub mod relay_service;
/// BYE placement for knockout draws.
pub mod seeding;
/// Shared realtime connection and per-topic subscriptions.
pub mod subscription_manager;
/// Displayed score reconciliation for one match.
pub mod sync_coordinator;
/// Connection seams and the WebSocket transport.
pub mod transport;
