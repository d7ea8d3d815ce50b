//! HTTP API layer with Axum routes and middleware.
//!
//! This crate provides:
//! - REST API routes for the points ledger
//! - Bearer-token authentication middleware
//! - Response types and error mapping

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pointbrew_core::ledger::Coordinator;
use pointbrew_core::reconcile::Reconciler;
use pointbrew_shared::JwtService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Transaction coordinator; the only write path into the ledger.
    pub coordinator: Arc<Coordinator>,
    /// Reconciliation job, also exposed for on-demand runs.
    pub reconciler: Arc<Reconciler>,
    /// Verifier for identity-provider tokens.
    pub jwt_service: Arc<JwtService>,
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes_with_state(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
