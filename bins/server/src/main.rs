//! PointBrew API Server
//!
//! Main entry point for the points-ledger service.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pointbrew_api::{AppState, create_router};
use pointbrew_core::ledger::{Coordinator, LedgerStore, RetryPolicy};
use pointbrew_core::policy::RewardCatalog;
use pointbrew_core::reconcile::Reconciler;
use pointbrew_db::{PgLedgerStore, connect};
use pointbrew_shared::{AppConfig, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pointbrew=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().expect("Failed to load configuration");

    // Connect to database
    let db = connect(&config.database).await?;
    info!("Connected to database");

    // Wire up the ledger engine
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(db));
    let catalog = RewardCatalog::from_config(&config.policy)?;
    info!(rewards = catalog.len(), "Reward catalog loaded");

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        catalog,
        RetryPolicy::from_config(&config.retry),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store,
        coordinator.clone(),
        config.reconciliation.batch_size,
    ));

    // Background reconciliation scheduler
    spawn_reconciliation_loop(reconciler.clone(), &config)?;

    // Create application state
    let state = AppState {
        coordinator,
        reconciler,
        jwt_service: Arc::new(JwtService::new(&config.jwt.secret)),
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically reconciles stale accounts.
fn spawn_reconciliation_loop(reconciler: Arc<Reconciler>, config: &AppConfig) -> anyhow::Result<()> {
    let interval = std::time::Duration::from_secs(config.reconciliation.interval_secs);
    let stale_after = chrono::Duration::seconds(i64::try_from(config.reconciliation.stale_after_secs)?);
    let batch_size = config.reconciliation.batch_size;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match reconciler.run_due(stale_after, batch_size).await {
                Ok(run) => {
                    if !run.reports.is_empty() || !run.failures.is_empty() {
                        info!(
                            reconciled = run.reports.len(),
                            drift_found = run.drift_count(),
                            failed = run.failures.len(),
                            "Reconciliation pass complete"
                        );
                    }
                    for (account_id, err) in &run.failures {
                        error!(%account_id, error = %err, "Account reconciliation failed");
                    }
                }
                Err(err) => error!(error = %err, "Reconciliation pass failed"),
            }
        }
    });
    Ok(())
}
