//! Service health endpoint.
//!
//! Public and unauthenticated. Besides liveness it reports how many
//! rewards the running catalog can price, since an empty catalog after a
//! config rollout means every redeem will fail with a catalog miss.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::AppState;

/// Liveness summary with the loaded catalog size.
#[derive(Serialize)]
pub struct HealthResponse {
    /// "ok" whenever the process can answer at all.
    pub status: &'static str,
    /// Service name, for multi-service health dashboards.
    pub service: &'static str,
    /// Crate version baked in at build time.
    pub version: &'static str,
    /// Number of rewards the redemption catalog can price.
    pub catalog_size: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "pointbrew",
        version: env!("CARGO_PKG_VERSION"),
        catalog_size: state.coordinator.catalog().len(),
    })
}

/// Health route, mounted outside the auth middleware.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    use pointbrew_core::ledger::{Coordinator, MemoryLedgerStore, RetryPolicy};
    use pointbrew_core::policy::{Reward, RewardCatalog};
    use pointbrew_core::reconcile::Reconciler;
    use pointbrew_shared::JwtService;

    fn state() -> AppState {
        let store = Arc::new(MemoryLedgerStore::new());
        let mut catalog = RewardCatalog::new();
        catalog.insert(Reward::new("FREE-COFFEE", 80).unwrap());
        catalog.insert(Reward::new("CROISSANT", 120).unwrap());
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            catalog,
            RetryPolicy::default(),
        ));
        let reconciler = Arc::new(Reconciler::new(store, coordinator.clone(), 50));
        AppState {
            coordinator,
            reconciler,
            jwt_service: Arc::new(JwtService::new("test-secret")),
        }
    }

    #[tokio::test]
    async fn test_health_reports_catalog_size_without_auth() {
        let state = state();
        let app = Router::new().merge(routes()).with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "pointbrew");
        assert_eq!(body["catalog_size"], 2);
    }
}
