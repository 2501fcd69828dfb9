//! HTTP host for file flow processing
//!
//! Serves the runner, registration and claim endpoints nodes talk to, the
//! operator API, and a WebSocket stream of status events.

pub mod config;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;
