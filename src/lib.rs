//! Library crate for courtside: match scoring, realtime score synchronization and
//! knockout draw seeding, plus the realtime relay served by the main binary.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
