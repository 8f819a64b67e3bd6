pub mod adapters;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod outbound;
pub mod ranking;
pub mod rate_limiter;
pub mod sanitize;
pub mod server;
pub mod traits;
