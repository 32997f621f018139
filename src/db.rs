//! Database layer — migrations, donor registry, session ledger, and the
//! admin aggregation reads.
//!
//! The unique index on `donations.session_id` is the only concurrency
//! control in this subsystem: every create path is written as
//! insert-or-ignore followed by a re-select, so a conflict means "already
//! recorded" rather than an error.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::donations::{display_name, Donation, DonationStatus, Donor, DonorInput, DonorTotals};
use crate::errors::Result;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Donor registry
// ─────────────────────────────────────────────────────────

/// Resolve a donor row by email, creating one when absent.
///
/// First write wins: an existing row is returned unchanged, with no field
/// updates.  Inputs without an email cannot be deduplicated and always get a
/// fresh row.
pub async fn find_or_create_donor(pool: &SqlitePool, input: &DonorInput) -> Result<Donor> {
    if let Some(email) = input.email.as_deref() {
        if let Some(existing) = get_donor_by_email(pool, email).await? {
            return Ok(existing);
        }
    }

    let id = Uuid::new_v4().to_string();
    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO donors
            (id, email, first_name, last_name, anonymous, country, language, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&id)
    .bind(&input.email)
    .bind(&input.first_name)
    .bind(&input.last_name)
    .bind(input.anonymous)
    .bind(&input.country)
    .bind(&input.language)
    .bind(now_epoch())
    .execute(pool)
    .await?
    .rows_affected();

    if inserted == 0 {
        // Lost a create race on the email unique index; the winner's row is
        // the authoritative one.
        if let Some(email) = input.email.as_deref() {
            if let Some(existing) = get_donor_by_email(pool, email).await? {
                debug!("Donor create raced on email; returning existing row");
                return Ok(existing);
            }
        }
    }

    let donor = sqlx::query_as::<_, Donor>(
        r#"
        SELECT id, email, first_name, last_name, anonymous, country, language, created_at
        FROM   donors
        WHERE  id = ?1
        "#,
    )
    .bind(&id)
    .fetch_one(pool)
    .await?;
    Ok(donor)
}

pub async fn get_donor(pool: &SqlitePool, id: &str) -> Result<Option<Donor>> {
    let donor = sqlx::query_as::<_, Donor>(
        r#"
        SELECT id, email, first_name, last_name, anonymous, country, language, created_at
        FROM   donors
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(donor)
}

async fn get_donor_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Donor>> {
    let donor = sqlx::query_as::<_, Donor>(
        r#"
        SELECT id, email, first_name, last_name, anonymous, country, language, created_at
        FROM   donors
        WHERE  email = ?1
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(donor)
}

// ─────────────────────────────────────────────────────────
// Session ledger writes
// ─────────────────────────────────────────────────────────

/// Fields for a new ledger entry.  `session_id` is the idempotency key.
#[derive(Debug, Clone)]
pub struct NewDonation {
    pub session_id: String,
    pub donor_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub donation_type: String,
    pub project_id: Option<String>,
}

/// Record exactly one ledger entry per session id.
///
/// A duplicate attempt (client retry, concurrent create) hits the unique
/// index, is ignored, and the pre-existing row is returned unchanged.
pub async fn record_donation(pool: &SqlitePool, new: &NewDonation) -> Result<Donation> {
    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO donations
            (id, donor_id, amount_cents, currency, donation_type, project_id,
             session_id, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&new.donor_id)
    .bind(new.amount_cents)
    .bind(&new.currency)
    .bind(&new.donation_type)
    .bind(&new.project_id)
    .bind(&new.session_id)
    .bind(DonationStatus::Open.as_str())
    .bind(now_epoch())
    .execute(pool)
    .await?
    .rows_affected();

    if inserted == 0 {
        debug!(
            session_id = %new.session_id,
            "Donation already recorded for session; returning existing row"
        );
    }

    let donation = get_donation_by_session(pool, &new.session_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok(donation)
}

pub async fn get_donation_by_session(
    pool: &SqlitePool,
    session_id: &str,
) -> Result<Option<Donation>> {
    let donation = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, donor_id, amount_cents, currency, donation_type, project_id,
               session_id, status, created_at, completed_at
        FROM   donations
        WHERE  session_id = ?1
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok(donation)
}

/// Reconcile a ledger entry against an authoritative provider observation.
///
/// * Status moves forward only: a terminal entry keeps its status no matter
///   what is observed later.
/// * `completed_at` is set exactly once, on the first open → complete
///   transition, and never touched again.
/// * The provider's `amount_total` overrides the client-declared amount,
///   including on terminal entries.
///
/// Returns `None` when no ledger entry exists for the session (read-only
/// passthrough case).  Safe to call repeatedly.
pub async fn apply_session_status(
    pool: &SqlitePool,
    session_id: &str,
    observed: DonationStatus,
    amount_cents: Option<i64>,
) -> Result<Option<Donation>> {
    let Some(existing) = get_donation_by_session(pool, session_id).await? else {
        return Ok(None);
    };

    let current = DonationStatus::from_db(&existing.status);
    let next = if current.is_terminal() { current } else { observed };

    let completed_at = match (next, existing.completed_at) {
        (DonationStatus::Complete, None) => Some(now_epoch()),
        (_, prior) => prior,
    };

    let amount = amount_cents
        .filter(|a| *a > 0)
        .unwrap_or(existing.amount_cents);

    sqlx::query(
        r#"
        UPDATE donations
        SET    status = ?1, completed_at = ?2, amount_cents = ?3
        WHERE  session_id = ?4
        "#,
    )
    .bind(next.as_str())
    .bind(completed_at)
    .bind(amount)
    .bind(session_id)
    .execute(pool)
    .await?;

    get_donation_by_session(pool, session_id).await
}

// ─────────────────────────────────────────────────────────
// Admin aggregation reads
// ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct DonorTotalsRow {
    id: String,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    anonymous: bool,
    sum_cents: i64,
    donations_count: i64,
    last_completed: Option<i64>,
}

/// Roll up completed donations per donor for the admin report.
///
/// Only `complete` entries count; open and expired checkouts never appear as
/// pledges.  Search and sort apply to the full aggregate set, pagination
/// last, so page boundaries reflect the filtered ordering.
pub async fn list_donor_totals(
    pool: &SqlitePool,
    page: i64,
    page_size: i64,
    search: Option<&str>,
) -> Result<Vec<DonorTotals>> {
    let rows = sqlx::query_as::<_, DonorTotalsRow>(
        r#"
        SELECT d.id, d.email, d.first_name, d.last_name, d.anonymous,
               SUM(n.amount_cents)  AS sum_cents,
               COUNT(n.id)          AS donations_count,
               MAX(n.completed_at)  AS last_completed
        FROM   donations n
        JOIN   donors d ON d.id = n.donor_id
        WHERE  n.status = ?1
        GROUP  BY d.id
        "#,
    )
    .bind(DonationStatus::Complete.as_str())
    .fetch_all(pool)
    .await?;

    let mut totals: Vec<DonorTotals> = rows
        .into_iter()
        .map(|r| DonorTotals {
            name: display_name(
                r.first_name.as_deref(),
                r.last_name.as_deref(),
                r.email.as_deref(),
            ),
            id: r.id,
            email: r.email,
            anonymous: r.anonymous,
            total_donated: ((r.sum_cents as f64) / 100.0).round() as i64,
            donations_count: r.donations_count,
            last_donation: r.last_completed,
        })
        .collect();

    if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
        let needle = search.to_lowercase();
        totals.retain(|t| {
            t.name.to_lowercase().contains(&needle)
                || t.email
                    .as_deref()
                    .is_some_and(|e| e.to_lowercase().contains(&needle))
        });
    }

    totals.sort_by(|a, b| {
        b.total_donated
            .cmp(&a.total_donated)
            .then_with(|| a.name.cmp(&b.name))
    });

    let page = page.max(1);
    let page_size = page_size.clamp(1, 200);
    let start = ((page - 1) * page_size) as usize;
    Ok(totals
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect())
}

/// A donor plus every ledger entry referencing them, newest first.
///
/// All statuses are included: for an administrative audit, abandoned and
/// expired attempts carry information the public totals deliberately omit.
pub async fn donor_profile(
    pool: &SqlitePool,
    donor_id: &str,
) -> Result<Option<(Donor, Vec<Donation>)>> {
    let Some(donor) = get_donor(pool, donor_id).await? else {
        return Ok(None);
    };

    let donations = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, donor_id, amount_cents, currency, donation_type, project_id,
               session_id, status, created_at, completed_at
        FROM   donations
        WHERE  donor_id = ?1
        ORDER  BY created_at DESC, id DESC
        "#,
    )
    .bind(donor_id)
    .fetch_all(pool)
    .await?;

    Ok(Some((donor, donations)))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn donor_with_email(email: &str) -> DonorInput {
        DonorInput {
            email: Some(email.to_string()),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            ..Default::default()
        }
    }

    fn new_donation(session_id: &str, donor_id: Option<&str>, amount_cents: i64) -> NewDonation {
        NewDonation {
            session_id: session_id.to_string(),
            donor_id: donor_id.map(String::from),
            amount_cents,
            currency: "usd".to_string(),
            donation_type: "one-time".to_string(),
            project_id: Some("kits".to_string()),
        }
    }

    async fn count_donations(pool: &SqlitePool) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM donations")
            .fetch_one(pool)
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn donor_dedup_by_email() {
        let pool = test_pool().await;
        let first = find_or_create_donor(&pool, &donor_with_email("a@b.com"))
            .await
            .unwrap();

        // Second call with the same email returns the same row, unchanged.
        let mut retry = donor_with_email("a@b.com");
        retry.first_name = Some("Different".to_string());
        let second = find_or_create_donor(&pool, &retry).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.first_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn donors_without_email_are_never_deduped() {
        let pool = test_pool().await;
        let input = DonorInput::default();
        let first = find_or_create_donor(&pool, &input).await.unwrap();
        let second = find_or_create_donor(&pool, &input).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn record_donation_is_idempotent_per_session() {
        let pool = test_pool().await;
        let first = record_donation(&pool, &new_donation("cs_1", None, 1500))
            .await
            .unwrap();
        assert_eq!(first.status, "open");

        // Retry with a different client-declared amount must not create a
        // second row nor alter the first.
        let second = record_donation(&pool, &new_donation("cs_1", None, 9900))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.amount_cents, 1500);
        assert_eq!(count_donations(&pool).await, 1);
    }

    #[tokio::test]
    async fn reconcile_sets_completed_at_once() {
        let pool = test_pool().await;
        record_donation(&pool, &new_donation("cs_2", None, 1500))
            .await
            .unwrap();

        let completed = apply_session_status(&pool, "cs_2", DonationStatus::Complete, Some(1500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.status, "complete");
        let first_ts = completed.completed_at.unwrap();

        // Pin the timestamp to a known value so a same-second re-reconcile
        // cannot mask an overwrite.
        sqlx::query("UPDATE donations SET completed_at = 42 WHERE session_id = 'cs_2'")
            .execute(&pool)
            .await
            .unwrap();

        let again = apply_session_status(&pool, "cs_2", DonationStatus::Complete, Some(1500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.completed_at, Some(42));
        assert!(first_ts > 0);
    }

    #[tokio::test]
    async fn terminal_status_never_regresses() {
        let pool = test_pool().await;
        record_donation(&pool, &new_donation("cs_3", None, 1500))
            .await
            .unwrap();
        apply_session_status(&pool, "cs_3", DonationStatus::Complete, Some(1500))
            .await
            .unwrap();
        sqlx::query("UPDATE donations SET completed_at = 42 WHERE session_id = 'cs_3'")
            .execute(&pool)
            .await
            .unwrap();

        // A later "open" observation must leave the terminal state alone,
        // though the provider may still correct the amount.
        let after = apply_session_status(&pool, "cs_3", DonationStatus::Open, Some(2000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, "complete");
        assert_eq!(after.completed_at, Some(42));
        assert_eq!(after.amount_cents, 2000);
    }

    #[tokio::test]
    async fn reconcile_unknown_session_is_a_noop() {
        let pool = test_pool().await;
        let result = apply_session_status(&pool, "cs_missing", DonationStatus::Complete, None)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(count_donations(&pool).await, 0);
    }

    #[tokio::test]
    async fn totals_count_only_completed_donations() {
        let pool = test_pool().await;
        let donor = find_or_create_donor(&pool, &donor_with_email("a@b.com"))
            .await
            .unwrap();

        record_donation(&pool, &new_donation("cs_done", Some(&donor.id), 2500))
            .await
            .unwrap();
        apply_session_status(&pool, "cs_done", DonationStatus::Complete, Some(2500))
            .await
            .unwrap();
        // Still open: must not contribute to totals or counts.
        record_donation(&pool, &new_donation("cs_open", Some(&donor.id), 9900))
            .await
            .unwrap();

        let totals = list_donor_totals(&pool, 1, 50, None).await.unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].id, donor.id);
        assert_eq!(totals[0].total_donated, 25);
        assert_eq!(totals[0].donations_count, 1);
        assert_eq!(totals[0].name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn totals_sort_search_and_paginate() {
        let pool = test_pool().await;
        for (email, amount) in [("low@x.com", 1000), ("high@x.com", 9000), ("mid@x.com", 5000)] {
            let donor = find_or_create_donor(
                &pool,
                &DonorInput {
                    email: Some(email.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            let session = format!("cs_{email}");
            record_donation(&pool, &new_donation(&session, Some(&donor.id), amount))
                .await
                .unwrap();
            apply_session_status(&pool, &session, DonationStatus::Complete, Some(amount))
                .await
                .unwrap();
        }

        let all = list_donor_totals(&pool, 1, 50, None).await.unwrap();
        let names: Vec<_> = all.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);

        // Case-insensitive substring match over name or email.
        let hit = list_donor_totals(&pool, 1, 50, Some("MID")).await.unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].email.as_deref(), Some("mid@x.com"));

        // Pagination after sort: page 2 of size 1 is the second-largest.
        let page2 = list_donor_totals(&pool, 2, 1, None).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].name, "mid");
    }

    #[tokio::test]
    async fn profile_lists_all_statuses_newest_first() {
        let pool = test_pool().await;
        let donor = find_or_create_donor(&pool, &donor_with_email("a@b.com"))
            .await
            .unwrap();
        record_donation(&pool, &new_donation("cs_old", Some(&donor.id), 1000))
            .await
            .unwrap();
        sqlx::query("UPDATE donations SET created_at = 100 WHERE session_id = 'cs_old'")
            .execute(&pool)
            .await
            .unwrap();
        record_donation(&pool, &new_donation("cs_new", Some(&donor.id), 2000))
            .await
            .unwrap();
        sqlx::query("UPDATE donations SET created_at = 200 WHERE session_id = 'cs_new'")
            .execute(&pool)
            .await
            .unwrap();

        let (found, donations) = donor_profile(&pool, &donor.id).await.unwrap().unwrap();
        assert_eq!(found.id, donor.id);
        assert_eq!(donations.len(), 2);
        assert_eq!(donations[0].session_id, "cs_new");
        assert_eq!(donations[1].session_id, "cs_old");

        assert!(donor_profile(&pool, "nope").await.unwrap().is_none());
    }
}
