//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested amount is outside the server-side allow-list or bounds.
    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Invalid request: {0}")]
    Validation(String),

    /// The payment provider call failed or returned an unexpected shape.
    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, ApiError>;
