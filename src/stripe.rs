//! Stripe REST client — creates and retrieves hosted checkout sessions.
//!
//! Only the raw provider shapes live here; the provider's status vocabulary
//! is mapped into [`crate::donations::DonationStatus`] by the caller, at the
//! boundary, so it never reaches the ledger or the API surface.
//!
//! Calls are bounded by the shared [`Client`]'s request timeout and are not
//! retried in-request: a retry loop here could mint duplicate remote
//! sessions that the ledger would then have to reconcile.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::donations::{CheckoutRequest, DonationType};
use crate::errors::{ApiError, Result};

const API_BASE: &str = "https://api.stripe.com/v1";

// ─────────────────────────────────────────────────────────
// Provider response shapes
// ─────────────────────────────────────────────────────────

/// A checkout session as the provider reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    /// Hosted checkout URL; present on freshly created sessions.
    pub url: Option<String>,
    /// Raw provider status string (`open` / `complete` / `expired` / other).
    pub status: Option<String>,
    /// Authoritative total in minor units, once known.
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────

/// A freshly created session: id plus the redirect URL the donor is sent to.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub id: String,
    pub url: String,
}

/// Create a hosted checkout session for the given request.
///
/// A response without a redirect URL is treated as an unexpected shape.
pub async fn create_checkout_session(
    client: &Client,
    secret_key: &str,
    site_url: &str,
    request: &CheckoutRequest,
) -> Result<CreatedSession> {
    let form = build_session_form(request, site_url);

    let response = client
        .post(format!("{API_BASE}/checkout/sessions"))
        .bearer_auth(secret_key)
        .form(&form)
        .send()
        .await?;

    let session = read_session(response).await?;
    let url = session.url.ok_or_else(|| {
        ApiError::Provider("Checkout session created without a redirect URL".to_string())
    })?;
    debug!(session_id = %session.id, "Created provider checkout session");
    Ok(CreatedSession {
        id: session.id,
        url,
    })
}

/// Fetch the authoritative state of an existing session by id.
pub async fn retrieve_session(
    client: &Client,
    secret_key: &str,
    session_id: &str,
) -> Result<ProviderSession> {
    let response = client
        .get(format!("{API_BASE}/checkout/sessions/{session_id}"))
        .bearer_auth(secret_key)
        .send()
        .await?;

    read_session(response).await
}

async fn read_session(response: reqwest::Response) -> Result<ProviderSession> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ProviderErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .and_then(|e| e.message)
            .unwrap_or(body);
        return Err(ApiError::Provider(format!("{status}: {message}")));
    }
    Ok(response.json::<ProviderSession>().await?)
}

// ─────────────────────────────────────────────────────────
// Form encoding
// ─────────────────────────────────────────────────────────

/// Flatten a checkout request into the provider's form-encoded parameters.
///
/// Recurring donations become a monthly subscription; one-time donations a
/// plain payment with shipping/contact prefill when the donor supplied
/// enough detail.
fn build_session_form(request: &CheckoutRequest, site_url: &str) -> Vec<(String, String)> {
    let recurring = request.donation_type == DonationType::Recurring;
    let mut form: Vec<(String, String)> = vec![
        (
            "mode".into(),
            if recurring { "subscription" } else { "payment" }.into(),
        ),
        ("payment_method_types[0]".into(), "card".into()),
        (
            "success_url".into(),
            format!("{site_url}/#/checkout/success?session_id={{CHECKOUT_SESSION_ID}}"),
        ),
        ("cancel_url".into(), format!("{site_url}/#/checkout/cancel")),
        ("line_items[0][quantity]".into(), "1".into()),
        (
            "line_items[0][price_data][currency]".into(),
            request.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".into(),
            request.amount_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".into(),
            if recurring {
                "Monthly donation"
            } else {
                "One-time donation"
            }
            .into(),
        ),
        (
            "line_items[0][price_data][product_data][description]".into(),
            request.project_id.to_uppercase(),
        ),
        ("billing_address_collection".into(), "auto".into()),
        ("phone_number_collection[enabled]".into(), "true".into()),
        ("metadata[projectId]".into(), request.project_id.clone()),
        (
            "metadata[donationType]".into(),
            request.donation_type.as_str().into(),
        ),
    ];

    if recurring {
        form.push((
            "line_items[0][price_data][recurring][interval]".into(),
            "month".into(),
        ));
    }

    if let Some(donor) = &request.donor {
        if let Some(email) = &donor.email {
            form.push(("customer_email".into(), email.clone()));
            form.push(("metadata[email]".into(), email.clone()));
        }
        if let Some(first) = &donor.first_name {
            form.push(("metadata[firstName]".into(), first.clone()));
        }
        if let Some(last) = &donor.last_name {
            form.push(("metadata[lastName]".into(), last.clone()));
        }
        form.push(("metadata[anonymous]".into(), donor.anonymous.to_string()));

        // Prefill contact details on one-time payments.  The provider
        // requires a name whenever a shipping block is present, so the whole
        // block is skipped without one.
        if !recurring {
            let name = [donor.first_name.as_deref(), donor.last_name.as_deref()]
                .iter()
                .filter_map(|p| *p)
                .collect::<Vec<_>>()
                .join(" ");
            if !name.trim().is_empty() {
                let prefix = "payment_intent_data[shipping]";
                form.push((format!("{prefix}[name]"), name.trim().to_string()));
                if let Some(phone) = &donor.phone {
                    form.push((format!("{prefix}[phone]"), phone.clone()));
                }
                if let Some(address) = &donor.address {
                    form.push((format!("{prefix}[address][line1]"), address.clone()));
                }
                if let Some(city) = &donor.city {
                    form.push((format!("{prefix}[address][city]"), city.clone()));
                }
                if let Some(country) = &donor.country {
                    form.push((format!("{prefix}[address][country]"), country.clone()));
                }
            }
        }
    }

    form
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::donations::DonorInput;

    fn request(donation_type: DonationType) -> CheckoutRequest {
        CheckoutRequest {
            amount_cents: 1500,
            currency: "usd".to_string(),
            donation_type,
            project_id: "kits".to_string(),
            donor: Some(DonorInput {
                email: Some("a@b.com".to_string()),
                first_name: Some("Ada".to_string()),
                last_name: Some("Lovelace".to_string()),
                ..Default::default()
            }),
        }
    }

    fn get<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn one_time_form_is_a_plain_payment() {
        let form = build_session_form(&request(DonationType::OneTime), "https://example.org");
        assert_eq!(get(&form, "mode"), Some("payment"));
        assert_eq!(
            get(&form, "line_items[0][price_data][unit_amount]"),
            Some("1500")
        );
        assert_eq!(
            get(&form, "line_items[0][price_data][product_data][name]"),
            Some("One-time donation")
        );
        assert_eq!(
            get(&form, "line_items[0][price_data][product_data][description]"),
            Some("KITS")
        );
        assert_eq!(
            get(&form, "success_url"),
            Some("https://example.org/#/checkout/success?session_id={CHECKOUT_SESSION_ID}")
        );
        assert!(get(&form, "line_items[0][price_data][recurring][interval]").is_none());
        // Shipping prefill present because the donor supplied a name.
        assert_eq!(
            get(&form, "payment_intent_data[shipping][name]"),
            Some("Ada Lovelace")
        );
    }

    #[test]
    fn recurring_form_is_a_monthly_subscription() {
        let form = build_session_form(&request(DonationType::Recurring), "https://example.org");
        assert_eq!(get(&form, "mode"), Some("subscription"));
        assert_eq!(
            get(&form, "line_items[0][price_data][recurring][interval]"),
            Some("month")
        );
        assert_eq!(
            get(&form, "line_items[0][price_data][product_data][name]"),
            Some("Monthly donation")
        );
        assert!(get(&form, "payment_intent_data[shipping][name]").is_none());
    }

    #[test]
    fn donor_fields_land_in_metadata() {
        let form = build_session_form(&request(DonationType::OneTime), "https://example.org");
        assert_eq!(get(&form, "customer_email"), Some("a@b.com"));
        assert_eq!(get(&form, "metadata[email]"), Some("a@b.com"));
        assert_eq!(get(&form, "metadata[firstName]"), Some("Ada"));
        assert_eq!(get(&form, "metadata[projectId]"), Some("kits"));
        assert_eq!(get(&form, "metadata[donationType]"), Some("one-time"));
        assert_eq!(get(&form, "metadata[anonymous]"), Some("false"));
    }

    #[test]
    fn anonymous_request_omits_donor_parameters() {
        let mut req = request(DonationType::OneTime);
        req.donor = None;
        let form = build_session_form(&req, "https://example.org");
        assert!(get(&form, "customer_email").is_none());
        assert!(get(&form, "metadata[email]").is_none());
        assert!(get(&form, "payment_intent_data[shipping][name]").is_none());
    }

    #[test]
    fn provider_error_body_parses() {
        let body: ProviderErrorBody =
            serde_json::from_str(r#"{"error":{"message":"No such session","type":"invalid_request_error"}}"#)
                .unwrap();
        assert_eq!(
            body.error.and_then(|e| e.message).as_deref(),
            Some("No such session")
        );
    }
}
