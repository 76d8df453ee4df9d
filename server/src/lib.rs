//! HTTP and WebSocket front end for the synthesis core.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod router;
pub mod state;
pub mod validation;
pub mod ws;

pub use config::ServerConfig;
pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
