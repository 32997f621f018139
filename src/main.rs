//! Donation checkout backend — entry point.
//!
//! Exposes the public checkout/status endpoints and the admin donor reports
//! over an Axum REST API, backed by a SQLite session ledger.  Live provider
//! credentials select live mode; otherwise a configured fallback redirect
//! runs the service degraded, with the ledger path fully exercisable.

mod api;
mod checkout;
mod config;
mod db;
mod donations;
mod errors;
mod stripe;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use checkout::CheckoutService;
use config::{CheckoutMode, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.  Missing provider credentials *and*
    // missing fallback URL is fatal here, not per-request.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    match &config.mode {
        CheckoutMode::Live { .. } => info!("Checkout mode: live"),
        CheckoutMode::Mock { redirect_url } => {
            info!("Checkout mode: mock (redirecting to {redirect_url})")
        }
    }

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client for outbound provider calls, bounded by a request timeout.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let checkout = CheckoutService::new(pool.clone(), client, &config);
    let state = Arc::new(api::ApiState { checkout, pool });

    let app = Router::new()
        .route("/health", get(api::health))
        .route(
            "/donations/checkout-session",
            post(api::create_checkout_session),
        )
        .route("/donations/session-status", get(api::session_status))
        .route("/donations/receipt", get(api::receipt))
        .route("/payments/session/:id", get(api::payment_session))
        .route("/admin/donors", get(api::admin_list_donors))
        .route("/admin/donors/:id", get(api::admin_donor_profile))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
