//! Axum REST API handlers.
//!
//! Thin layer over [`CheckoutService`] and the admin aggregation reads.
//! Admin routes are served unguarded here; authentication and role checks
//! are owned by the deployment's gateway layer.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::checkout::{CheckoutService, CheckoutSummary, SessionView};
use crate::db;
use crate::donations::{CheckoutRequest, Donation, DonationStatus, Donor, DonorTotals};
use crate::errors::ApiError;

#[derive(Clone)]
pub struct ApiState {
    pub checkout: CheckoutService,
    pub pool: SqlitePool,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
}

#[derive(Serialize)]
pub struct SessionStatusResponse {
    pub status: DonationStatus,
}

#[derive(Serialize)]
pub struct ReceiptResponse {
    pub amount: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Serialize)]
pub struct DonorProfileResponse {
    pub donor: Donor,
    pub donations: Vec<Donation>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidAmount | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            // Upstream provider failures, including transport errors.
            ApiError::Provider(_) | ApiError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /donations/checkout-session`
///
/// Validates the declared amount, creates (or mocks) a provider session, and
/// records the open ledger entry.
pub async fn create_checkout_session(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSummary>, ApiError> {
    let summary = state.checkout.create_checkout_session(request).await?;
    Ok(Json(summary))
}

/// `GET /donations/session-status?session_id=`
///
/// Success-page poll; the reconciliation side effect happens here.
pub async fn session_status(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let view = state.checkout.get_session_status(&query.session_id).await?;
    Ok(Json(SessionStatusResponse {
        status: view.status,
    }))
}

/// `GET /donations/receipt?session_id=`
pub async fn receipt(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let view = state.checkout.get_session_status(&query.session_id).await?;
    Ok(Json(ReceiptResponse {
        amount: view.amount_total,
        currency: view.currency,
    }))
}

/// `GET /payments/session/:id`
///
/// Full public session view for the success page.
pub async fn payment_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let view = state.checkout.get_session_status(&id).await?;
    Ok(Json(view))
}

/// `GET /admin/donors?page=&pageSize=&search=`
pub async fn admin_list_donors(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DonorListQuery>,
) -> Result<Json<Vec<DonorTotals>>, ApiError> {
    let totals = db::list_donor_totals(
        &state.pool,
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(50),
        query.search.as_deref(),
    )
    .await?;
    Ok(Json(totals))
}

/// `GET /admin/donors/:id`
///
/// Absence is an expected outcome of an admin lookup, answered with a 404
/// body rather than a server error.
pub async fn admin_donor_profile(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<DonorProfileResponse>, ApiError> {
    let (donor, donations) = db::donor_profile(&state.pool, &id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(DonorProfileResponse { donor, donations }))
}
