//! Checkout orchestration and poll-driven status reconciliation.
//!
//! [`CheckoutService`] owns the live-vs-mock decision, fixed at construction
//! from [`CheckoutMode`].  Either way the flow is the same: validate the
//! client-declared amount, obtain a session id, resolve the donor, and write
//! exactly one ledger entry for that session.
//!
//! Reconciliation is poll-only: the ledger learns of completion when the
//! success page asks for the session status, not via webhook.  A completed
//! payment whose success page is never visited therefore stays `open`
//! locally until someone polls it.

use reqwest::Client;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::config::{CheckoutMode, Config};
use crate::db::{self, NewDonation};
use crate::donations::{CheckoutRequest, DonationStatus};
use crate::errors::{ApiError, Result};
use crate::stripe;

/// Minimum accepted donation: one major unit.
const MIN_AMOUNT_CENTS: i64 = 100;
/// Upper bound guard against typo'd amounts.
const MAX_AMOUNT_CENTS: i64 = 100_000_000;
const SUPPORTED_CURRENCY: &str = "usd";

/// What the client needs to start paying: the session id and where to go.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutSummary {
    pub id: String,
    pub url: String,
}

/// Public view of one session's authoritative state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionView {
    pub id: String,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub status: DonationStatus,
}

#[derive(Clone)]
pub struct CheckoutService {
    pool: SqlitePool,
    client: Client,
    mode: CheckoutMode,
    site_url: String,
    allowed_amounts_cents: Vec<i64>,
}

impl CheckoutService {
    pub fn new(pool: SqlitePool, client: Client, config: &Config) -> Self {
        Self {
            pool,
            client,
            mode: config.mode.clone(),
            site_url: config.site_url.clone(),
            allowed_amounts_cents: config.allowed_amounts_cents.clone(),
        }
    }

    /// Create (or synthesize) a checkout session and record it in the ledger.
    ///
    /// Validation happens before any provider call or write.  The ledger
    /// write is idempotent on session id, so a client retry that somehow
    /// reuses a session cannot produce a duplicate row.
    pub async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSummary> {
        self.validate(&request)?;

        let (session_id, url) = match &self.mode {
            CheckoutMode::Mock { redirect_url } => (mock_session_id(), redirect_url.clone()),
            CheckoutMode::Live { secret_key } => {
                let created = stripe::create_checkout_session(
                    &self.client,
                    secret_key,
                    &self.site_url,
                    &request,
                )
                .await?;
                (created.id, created.url)
            }
        };

        let donor_id = match &request.donor {
            Some(input) => Some(db::find_or_create_donor(&self.pool, input).await?.id),
            None => None,
        };

        db::record_donation(
            &self.pool,
            &NewDonation {
                session_id: session_id.clone(),
                donor_id,
                amount_cents: request.amount_cents,
                currency: request.currency.clone(),
                donation_type: request.donation_type.as_str().to_string(),
                project_id: Some(request.project_id.clone()),
            },
        )
        .await?;

        info!(
            session_id = %session_id,
            amount_cents = request.amount_cents,
            "Recorded open donation for checkout session"
        );
        Ok(CheckoutSummary {
            id: session_id,
            url,
        })
    }

    /// Return a session's current status, reconciling the ledger in live mode.
    ///
    /// Live mode fetches the provider's authoritative state, maps its status
    /// vocabulary, and applies it to the ledger entry (forward-only; see
    /// [`db::apply_session_status`]).  A session the ledger never saw is a
    /// read-only passthrough.  Mock mode has no provider to ask and returns
    /// the stored entry verbatim; an unknown session reads as still-pending.
    pub async fn get_session_status(&self, session_id: &str) -> Result<SessionView> {
        match &self.mode {
            CheckoutMode::Mock { .. } => {
                let view = match db::get_donation_by_session(&self.pool, session_id).await? {
                    Some(donation) => SessionView {
                        id: session_id.to_string(),
                        amount_total: Some(donation.amount_cents),
                        currency: Some(donation.currency),
                        status: DonationStatus::from_db(&donation.status),
                    },
                    None => SessionView {
                        id: session_id.to_string(),
                        amount_total: None,
                        currency: None,
                        status: DonationStatus::Open,
                    },
                };
                Ok(view)
            }
            CheckoutMode::Live { secret_key } => {
                let session =
                    stripe::retrieve_session(&self.client, secret_key, session_id).await?;
                let observed = DonationStatus::from_provider(session.status.as_deref().unwrap_or(""));

                let reconciled =
                    db::apply_session_status(&self.pool, session_id, observed, session.amount_total)
                        .await?;

                // A terminal ledger entry outranks a stale "open" from the
                // provider in what callers see, matching what it stores.
                let status = reconciled
                    .map(|d| DonationStatus::from_db(&d.status))
                    .unwrap_or(observed);

                Ok(SessionView {
                    id: session.id,
                    amount_total: session.amount_total,
                    currency: session.currency,
                    status,
                })
            }
        }
    }

    fn validate(&self, request: &CheckoutRequest) -> Result<()> {
        if request.amount_cents < MIN_AMOUNT_CENTS || request.amount_cents > MAX_AMOUNT_CENTS {
            return Err(ApiError::InvalidAmount);
        }
        if !self.allowed_amounts_cents.is_empty()
            && !self.allowed_amounts_cents.contains(&request.amount_cents)
        {
            return Err(ApiError::InvalidAmount);
        }
        if request.currency != SUPPORTED_CURRENCY {
            return Err(ApiError::Validation(format!(
                "Unsupported currency: {}",
                request.currency
            )));
        }
        Ok(())
    }
}

fn mock_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("cs_test_mock_{}", &suffix[..8])
}

// ─────────────────────────────────────────────────────────
// Unit tests (mock mode; no network)
// ─────────────────────────────────────────────────────────
