//! Web gateway: the WebSocket conversation endpoint plus a small REST
//! surface over the record cache.
//!
//! ```text
//! GET  /health                 liveness and session count
//! GET  /pharmacies             full upstream listing
//! GET  /pharmacies/search      ?phone= cached lookup
//! POST /cache/invalidate       {"phone"?} drop one or all entries
//! GET  /ws/pharmacy-agent      WebSocket upgrade
//! ```

mod records;
mod server;
pub mod types;
mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{AgentRouter, SessionRegistry};
use crate::config::Environment;
use crate::records::RecordCache;

pub use server::GatewayServer;
use types::HealthResponse;

/// Shared state behind every route.
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    pub router: AgentRouter,
    pub cache: RecordCache,
    pub environment: Environment,
}

impl GatewayState {
    pub fn new(registry: Arc<SessionRegistry>, router: AgentRouter, environment: Environment) -> Self {
        Self {
            registry,
            cache: router.cache().clone(),
            router,
            environment,
        }
    }
}

/// Gateway routes with state applied.
pub fn routes(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/pharmacies", get(records::list_pharmacies))
        .route("/pharmacies/search", get(records::search_pharmacy))
        .route("/cache/invalidate", post(records::invalidate_cache))
        .route("/ws/pharmacy-agent", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.environment.to_string(),
        active_sessions: state.registry.len().await,
    })
}
