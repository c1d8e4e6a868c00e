//! Voiceline server
//!
//! HTTP and WebSocket endpoints over the dialog pipeline: session
//! registry, audio artifact cache, read-only agent store, and the
//! transport bridge between axum websockets and the turn controller.

pub mod agents;
pub mod cache;
pub mod http;
pub mod session;
pub mod state;
pub mod ws;

pub use agents::AgentStore;
pub use cache::AudioCache;
pub use http::create_router;
pub use session::SessionRegistry;
pub use state::AppState;

use thiserror::Error;

/// Server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("provider setup error: {0}")]
    Provider(String),

    #[error("configuration error: {0}")]
    Config(String),
}
