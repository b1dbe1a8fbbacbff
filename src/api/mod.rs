//! HTTP API for sessions, the tool catalog and metrics
//!
//! ```text
//! GET    /health                           liveness + counts
//! GET    /metrics                          prometheus text format
//! GET    /tools                            catalog listing
//! POST   /sessions                         create (provisions environment)
//! GET    /sessions?status=ready            list, newest first
//! GET    /sessions/:id                     one session with history
//! DELETE /sessions/:id                     stop and tear down
//! POST   /sessions/:id/run                 run a task to completion
//! POST   /sessions/:id/cancel              cancel the running task
//! POST   /sessions/:id/reset               clear history
//! GET    /sessions/:id/environment-health  probe the environment
//! ```
//!
//! Errors are returned as `{"error": "...", "code": "..."}`.

mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::agent::Agent;
use crate::session::SessionManager;

pub use handlers::ApiError;

/// Shared state for every handler
#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionManager>,
    pub agent: Arc<Agent>,
}

impl ApiState {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        let agent = sessions.agent().clone();
        Self { sessions, agent }
    }
}

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/tools", get(handlers::list_tools))
        .route(
            "/sessions",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .route(
            "/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/:id/run", post(handlers::run_task))
        .route("/sessions/:id/cancel", post(handlers::cancel_task))
        .route("/sessions/:id/reset", post(handlers::reset_history))
        .route(
            "/sessions/:id/environment-health",
            get(handlers::environment_health),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
