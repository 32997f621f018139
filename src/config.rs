//! Application configuration loaded from environment variables.

use crate::errors::{ApiError, Result};

/// How checkout sessions are obtained, fixed once at startup.
///
/// Live-vs-degraded is an explicit value injected into the orchestrator,
/// never a runtime-checked flag on a shared client.
#[derive(Debug, Clone)]
pub enum CheckoutMode {
    /// Create hosted sessions against the real payment provider.
    Live { secret_key: String },
    /// No provider credentials: synthesize local session ids and send the
    /// donor to a fixed redirect URL so the ledger path stays exercisable.
    Mock { redirect_url: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Public site base URL, used to build success/cancel redirects
    pub site_url: String,
    /// Live provider credentials or the degraded-mode fallback
    pub mode: CheckoutMode,
    /// Server-enforced donation tiers in minor units; empty means any amount
    pub allowed_amounts_cents: Vec<i64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode = match env_var("STRIPE_SECRET_KEY") {
            Ok(secret_key) => CheckoutMode::Live { secret_key },
            Err(_) => match env_var("STRIPE_TEST_CHECKOUT_URL") {
                Ok(redirect_url) => CheckoutMode::Mock { redirect_url },
                Err(_) => {
                    return Err(ApiError::Config(
                        "Neither STRIPE_SECRET_KEY nor STRIPE_TEST_CHECKOUT_URL is set"
                            .to_string(),
                    ))
                }
            },
        };

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./donations.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid API_PORT".to_string()))?,
            site_url: env_var("SITE_URL").unwrap_or_else(|_| "http://localhost:5173".to_string()),
            mode,
            allowed_amounts_cents: parse_allowed_amounts(
                &env_var("ALLOWED_DONATION_AMOUNTS").unwrap_or_default(),
            ),
        })
    }
}

/// Parse the tier allow-list: comma-separated amounts in major units
/// (e.g. `"15,50,100"`), converted to minor units.  Blank or non-positive
/// entries are dropped; an empty result disables tier enforcement.
pub fn parse_allowed_amounts(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .map(|major| (major * 100.0).round() as i64)
        .filter(|cents| *cents > 0)
        .collect()
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ApiError::Config(format!("Missing env var: {key}")))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_unit_tiers_to_cents() {
        assert_eq!(parse_allowed_amounts("15,50,100"), vec![1500, 5000, 10000]);
    }

    #[test]
    fn tolerates_whitespace_and_fractions() {
        assert_eq!(parse_allowed_amounts(" 15 , 2.50 "), vec![1500, 250]);
    }

    #[test]
    fn drops_blank_and_invalid_entries() {
        assert_eq!(parse_allowed_amounts("15,,abc,-5,0"), vec![1500]);
        assert!(parse_allowed_amounts("").is_empty());
    }
}
