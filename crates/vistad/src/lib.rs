//! Vista daemon: the HTTP surface over `vista-core`.
//!
//! [`router`] builds the axum application; `main.rs` only loads config and
//! serves it.

pub mod api;
pub mod error;

use std::sync::Arc;

use vista_core::{AgentBackend, EchoBackend, Services};

pub use api::router;
pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub agent: Arc<dyn AgentBackend>,
}

impl AppState {
    /// State with the built-in echo agent.
    pub fn new(services: Services) -> Self {
        Self::with_agent(services, Arc::new(EchoBackend::default()))
    }

    pub fn with_agent(services: Services, agent: Arc<dyn AgentBackend>) -> Self {
        Self {
            services: Arc::new(services),
            agent,
        }
    }
}
