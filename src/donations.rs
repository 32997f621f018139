//! Domain types for the donation ledger.
//!
//! ## Status as a Finite-State Machine
//!
//! [`DonationStatus`] enforces a strict forward-only lifecycle:
//!
//! ```text
//! Open ──► Complete
//!   └────► Expired
//! ```
//!
//! `Complete` and `Expired` are terminal: a later, less definite observation
//! from the payment provider must never regress them.  The provider's own
//! status vocabulary is mapped into this closed enum at the boundary
//! ([`DonationStatus::from_provider`]) and never stored or returned raw.

use serde::{Deserialize, Serialize};

/// Lifecycle status of one recorded checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    /// Checkout created; payment not yet confirmed.
    Open,
    /// Payment confirmed by the provider.
    Complete,
    /// Checkout abandoned past the provider's deadline.
    Expired,
}

impl DonationStatus {
    /// Map the provider's raw status string into the local vocabulary.
    ///
    /// Unknown or intermediate provider states are treated as still-pending,
    /// never silently as complete.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "complete" => Self::Complete,
            "expired" => Self::Expired,
            _ => Self::Open,
        }
    }

    /// Parse the identifier stored in the database.
    pub fn from_db(raw: &str) -> Self {
        Self::from_provider(raw)
    }

    /// Short identifier string suitable for storage in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Complete => "complete",
            Self::Expired => "expired",
        }
    }

    /// Terminal statuses must never be overwritten by a less definite one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Expired)
    }
}

/// One-time card payment vs a monthly recurring pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationType {
    #[serde(rename = "one-time")]
    OneTime,
    #[serde(rename = "recurring")]
    Recurring,
}

impl DonationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one-time",
            Self::Recurring => "recurring",
        }
    }
}

/// Donor fields submitted alongside a checkout request.
///
/// Every field is optional; absence of `email` means the donor cannot be
/// deduplicated and a fresh registry row is created.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorInput {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    pub country: Option<String>,
    pub language: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
}

/// A public checkout request: the client's declaration of what they intend
/// to donate, validated server-side before any provider call or write.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Amount in minor currency units (cents).
    pub amount_cents: i64,
    pub currency: String,
    pub donation_type: DonationType,
    /// Opaque project/purpose reference carried into provider metadata.
    pub project_id: String,
    pub donor: Option<DonorInput>,
}

/// A donor registry row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donor {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub anonymous: bool,
    pub country: Option<String>,
    pub language: Option<String>,
    pub created_at: i64,
}

/// A session ledger row — the durable statement of one checkout attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: String,
    pub donor_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub donation_type: String,
    pub project_id: Option<String>,
    pub session_id: String,
    pub status: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// One aggregated admin-report row: a donor plus their completed totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorTotals {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub anonymous: bool,
    /// Sum of completed donations, rounded to major currency units.
    pub total_donated: i64,
    pub donations_count: i64,
    pub last_donation: Option<i64>,
}

/// Resolve a donor's display name: stored name parts, else the local part of
/// the email, else the literal `"Anonymous"`.
pub fn display_name(
    first_name: Option<&str>,
    last_name: Option<&str>,
    email: Option<&str>,
) -> String {
    let joined = [first_name, last_name]
        .iter()
        .filter_map(|p| *p)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !joined.is_empty() {
        return joined;
    }
    if let Some(email) = email {
        let local = email.split('@').next().unwrap_or(email).trim();
        if !local.is_empty() {
            return local.to_string();
        }
    }
    "Anonymous".to_string()
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_provider() {
        assert_eq!(
            DonationStatus::from_provider("complete"),
            DonationStatus::Complete
        );
        assert_eq!(
            DonationStatus::from_provider("expired"),
            DonationStatus::Expired
        );
        assert_eq!(DonationStatus::from_provider("open"), DonationStatus::Open);
    }

    #[test]
    fn unknown_provider_status_maps_to_open() {
        // Intermediate or future provider vocabulary must read as pending.
        assert_eq!(
            DonationStatus::from_provider("requires_action"),
            DonationStatus::Open
        );
        assert_eq!(DonationStatus::from_provider(""), DonationStatus::Open);
    }

    #[test]
    fn status_round_trips_through_db_string() {
        for status in [
            DonationStatus::Open,
            DonationStatus::Complete,
            DonationStatus::Expired,
        ] {
            assert_eq!(DonationStatus::from_db(status.as_str()), status);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!DonationStatus::Open.is_terminal());
        assert!(DonationStatus::Complete.is_terminal());
        assert!(DonationStatus::Expired.is_terminal());
    }

    #[test]
    fn donation_type_wire_form() {
        let one_time: DonationType = serde_json::from_str(r#""one-time""#).unwrap();
        assert_eq!(one_time, DonationType::OneTime);
        let recurring: DonationType = serde_json::from_str(r#""recurring""#).unwrap();
        assert_eq!(recurring, DonationType::Recurring);
        assert!(serde_json::from_str::<DonationType>(r#""weekly""#).is_err());
    }

    #[test]
    fn display_name_precedence() {
        assert_eq!(
            display_name(Some("Ada"), Some("Lovelace"), Some("ada@example.org")),
            "Ada Lovelace"
        );
        assert_eq!(display_name(Some("Ada"), None, None), "Ada");
        assert_eq!(
            display_name(None, None, Some("ada@example.org")),
            "ada"
        );
        assert_eq!(display_name(None, None, None), "Anonymous");
        assert_eq!(display_name(Some("  "), None, Some("@nodomain")), "Anonymous");
    }
}
