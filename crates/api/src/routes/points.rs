//! Points ledger routes.
//!
//! All routes are scoped to the authenticated account; the account ID comes
//! from the verified token, never from the request.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{AppState, middleware::AuthAccount};
use pointbrew_core::ledger::{ApplyOutcome, EntryReason, LedgerEntry, LedgerError};
use pointbrew_core::policy::DenyCode;
use pointbrew_shared::types::{IdempotencyKey, PageCursor, clamp_page_size};

/// Creates the points routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/points/earn", post(earn_points))
        .route("/points/redeem", post(redeem_points))
        .route("/points/balance", get(get_balance))
        .route("/points/history", get(get_history))
        .route("/points/reconcile", post(reconcile_account))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for earning points.
#[derive(Debug, Deserialize)]
pub struct EarnRequest {
    /// Points to credit; must be positive.
    pub amount: i64,
    /// Retry token, unique per logical action.
    pub idempotency_key: String,
    /// Why the points were earned: "purchase" (default) or "promotion".
    pub reason: Option<String>,
}

/// Request body for redeeming a reward.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Catalog code of the reward.
    pub reward_code: String,
    /// Retry token, unique per logical action.
    pub idempotency_key: String,
}

/// Query parameters for history pagination.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Opaque page token from a previous response.
    pub cursor: Option<String>,
    /// Page size (default 50, max 200).
    pub limit: Option<u64>,
}

/// A ledger entry as returned by the API.
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    /// Entry ID.
    pub id: Uuid,
    /// "accrual", "redemption", or "adjustment".
    pub kind: &'static str,
    /// Signed point delta.
    pub amount: i64,
    /// Enumerated cause.
    pub reason: &'static str,
    /// "applied" or "rejected".
    pub status: &'static str,
    /// Rejection cause, present on rejected entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_code: Option<&'static str>,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl From<&LedgerEntry> for EntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.into_inner(),
            kind: entry.kind.as_str(),
            amount: entry.amount,
            reason: entry.reason.as_str(),
            status: entry.status.as_str(),
            deny_code: entry.denied.map(DenyCode::as_str),
            created_at: entry.created_at,
        }
    }
}

/// Response for earn and redeem operations.
#[derive(Debug, Serialize)]
pub struct OutcomeResponse {
    /// The persisted entry.
    pub entry: EntryResponse,
    /// Balance after the operation.
    pub balance: i64,
    /// True when a previously recorded result was replayed.
    pub replayed: bool,
}

/// Response for the balance endpoint.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// The authenticated account.
    pub account_id: String,
    /// Current point balance.
    pub balance: i64,
}

/// Response for the history endpoint.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Entries, newest first.
    pub entries: Vec<EntryResponse>,
    /// Page token for the next page, absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

fn error_response(err: &LedgerError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(error = %err, "ledger operation failed");
    }
    (
        status,
        Json(json!({
            "error": err.error_code(),
            "message": err.to_string(),
            "retryable": err.is_retryable(),
        })),
    )
        .into_response()
}

/// Maps an apply outcome to a response: 200 for applied entries and
/// replays, 422 for recorded policy rejections.
fn outcome_response(outcome: &ApplyOutcome) -> Response {
    let body = OutcomeResponse {
        entry: EntryResponse::from(&outcome.entry),
        balance: outcome.balance,
        replayed: outcome.replayed,
    };
    let status = if outcome.entry.is_applied() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(body)).into_response()
}

fn bad_request(error: &str, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error, "message": message })),
    )
        .into_response()
}

/// POST /points/earn
async fn earn_points(
    State(state): State<AppState>,
    auth: AuthAccount,
    Json(req): Json<EarnRequest>,
) -> Response {
    let reason = match req.reason.as_deref() {
        None => EntryReason::Purchase,
        Some(s) => match EntryReason::parse(s) {
            Some(reason @ (EntryReason::Purchase | EntryReason::Promotion)) => reason,
            _ => {
                return bad_request(
                    "INVALID_REASON",
                    "reason must be \"purchase\" or \"promotion\"",
                );
            }
        },
    };

    let result = state
        .coordinator
        .earn(
            auth.0.clone(),
            IdempotencyKey::new(req.idempotency_key),
            req.amount,
            reason,
        )
        .await;

    match result {
        Ok(outcome) => {
            info!(
                account_id = %auth.0,
                amount = req.amount,
                replayed = outcome.replayed,
                "points earned"
            );
            outcome_response(&outcome)
        }
        Err(err) => error_response(&err),
    }
}

/// POST /points/redeem
async fn redeem_points(
    State(state): State<AppState>,
    auth: AuthAccount,
    Json(req): Json<RedeemRequest>,
) -> Response {
    let result = state
        .coordinator
        .redeem(
            auth.0.clone(),
            IdempotencyKey::new(req.idempotency_key),
            &req.reward_code,
        )
        .await;

    match result {
        Ok(outcome) => {
            info!(
                account_id = %auth.0,
                reward_code = %req.reward_code,
                applied = outcome.entry.is_applied(),
                replayed = outcome.replayed,
                "redemption processed"
            );
            outcome_response(&outcome)
        }
        Err(err) => error_response(&err),
    }
}

/// GET /points/balance
async fn get_balance(State(state): State<AppState>, auth: AuthAccount) -> Response {
    match state.coordinator.balance(&auth.0).await {
        Ok(balance) => Json(BalanceResponse {
            account_id: auth.0.as_str().to_owned(),
            balance,
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

/// GET /points/history
async fn get_history(
    State(state): State<AppState>,
    auth: AuthAccount,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let cursor = match query.cursor.as_deref() {
        None => None,
        Some(token) => match PageCursor::decode(token) {
            Some(cursor) => Some(cursor),
            None => return bad_request("INVALID_CURSOR", "cursor is not a valid page token"),
        },
    };
    let limit = clamp_page_size(query.limit);

    match state.coordinator.history(&auth.0, cursor, limit).await {
        Ok(page) => Json(HistoryResponse {
            entries: page.entries.iter().map(EntryResponse::from).collect(),
            next_cursor: page.next_cursor.map(|c| c.encode()),
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

/// POST /points/reconcile
///
/// On-demand reconciliation of the authenticated account; the scheduler
/// covers everyone else.
async fn reconcile_account(State(state): State<AppState>, auth: AuthAccount) -> Response {
    match state.reconciler.reconcile(&auth.0).await {
        Ok(report) => {
            if !report.is_clean() {
                warn!(account_id = %auth.0, drift = report.drift, "drift corrected");
            }
            Json(report).into_response()
        }
        Err(err) => error_response(&err),
    }
}
