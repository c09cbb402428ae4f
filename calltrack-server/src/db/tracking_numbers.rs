//! Tracking number persistence

use calltrack_common::pagination::PageRequest;
use calltrack_common::time::{format_timestamp, now, parse_optional, parse_timestamp};
use calltrack_common::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_uuid, parse_uuid};
use crate::models::{TrackingNumber, TrackingNumberStatus, TrackingNumberView};

const COLUMNS: &str = "id, number, tenant_id, marketing_source_id, provider_number_id, status, \
                       country, region, purchased_at, released_at, created_at, updated_at";

/// Number and provider id captured when a release is claimed
#[derive(Debug, Clone)]
pub struct ReleaseClaim {
    pub number: String,
    pub provider_number_id: Option<String>,
}

fn map_row(row: &SqliteRow) -> Result<TrackingNumber> {
    let id: String = row.get("id");
    let tenant_id: String = row.get("tenant_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(TrackingNumber {
        id: parse_uuid(&id)?,
        number: row.get("number"),
        tenant_id: parse_uuid(&tenant_id)?,
        marketing_source_id: parse_optional_uuid(row.get("marketing_source_id"))?,
        provider_number_id: row.get("provider_number_id"),
        status: TrackingNumberStatus::from_db(&status)?,
        country: row.get("country"),
        region: row.get("region"),
        purchased_at: parse_optional(row.get("purchased_at"))?,
        released_at: parse_optional(row.get("released_at"))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn insert<'e, E>(executor: E, number: &TrackingNumber) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO tracking_numbers (
            id, number, tenant_id, marketing_source_id, provider_number_id, status,
            country, region, purchased_at, released_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(number.id.to_string())
    .bind(&number.number)
    .bind(number.tenant_id.to_string())
    .bind(number.marketing_source_id.map(|id| id.to_string()))
    .bind(&number.provider_number_id)
    .bind(number.status.as_str())
    .bind(&number.country)
    .bind(&number.region)
    .bind(number.purchased_at.map(format_timestamp))
    .bind(number.released_at.map(format_timestamp))
    .bind(format_timestamp(number.created_at))
    .bind(format_timestamp(number.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

/// Ownership-scoped lookup
pub async fn find_owned<'e, E>(executor: E, tenant_id: Uuid, id: Uuid) -> Result<Option<TrackingNumber>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM tracking_numbers WHERE id = ? AND tenant_id = ?",
        COLUMNS
    ))
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(map_row).transpose()
}

/// Active tracking number for a dialed E.164 value
pub async fn find_active_by_number(pool: &SqlitePool, number: &str) -> Result<Option<TrackingNumber>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM tracking_numbers WHERE number = ? AND status = 'active'",
        COLUMNS
    ))
    .bind(number)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_row).transpose()
}

/// Transition active -> releasing; `None` when the number is not active
pub async fn begin_release(pool: &SqlitePool, tenant_id: Uuid, id: Uuid) -> Result<Option<ReleaseClaim>> {
    let row = sqlx::query(
        r#"
        UPDATE tracking_numbers
        SET status = 'releasing', updated_at = ?
        WHERE id = ? AND tenant_id = ? AND status = 'active'
        RETURNING number, provider_number_id
        "#,
    )
    .bind(format_timestamp(now()))
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| ReleaseClaim {
        number: row.get("number"),
        provider_number_id: row.get("provider_number_id"),
    }))
}

/// Transition releasing -> released and drop the provider id
pub async fn mark_released<'e, E>(executor: E, id: Uuid) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let stamp = format_timestamp(now());
    let result = sqlx::query(
        r#"
        UPDATE tracking_numbers
        SET status = 'released', released_at = ?, provider_number_id = NULL, updated_at = ?
        WHERE id = ? AND status = 'releasing'
        "#,
    )
    .bind(&stamp)
    .bind(&stamp)
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Transition releasing -> active after a failed provider release
pub async fn revert_release(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tracking_numbers SET status = 'active', updated_at = ? WHERE id = ? AND status = 'releasing'",
    )
    .bind(format_timestamp(now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Compare-and-swap on `updated_at`; optionally reassigns the marketing source
///
/// `marketing_source_id` of `None` leaves the column untouched,
/// `Some(None)` clears it.
pub async fn cas_touch<'e, E>(
    executor: E,
    id: Uuid,
    expected_updated_at: DateTime<Utc>,
    new_updated_at: DateTime<Utc>,
    marketing_source_id: Option<Option<Uuid>>,
) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let (set_source, source) = match marketing_source_id {
        Some(source) => (true, source.map(|id| id.to_string())),
        None => (false, None),
    };

    let result = sqlx::query(
        r#"
        UPDATE tracking_numbers
        SET updated_at = ?,
            marketing_source_id = CASE WHEN ? THEN ? ELSE marketing_source_id END
        WHERE id = ? AND updated_at = ? AND status = 'active'
        "#,
    )
    .bind(format_timestamp(new_updated_at))
    .bind(set_source)
    .bind(source)
    .bind(id.to_string())
    .bind(format_timestamp(expected_updated_at))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Page of a tenant's unreleased numbers with their active route
pub async fn list_for_tenant(
    pool: &SqlitePool,
    tenant_id: Uuid,
    page: PageRequest,
) -> Result<(Vec<TrackingNumberView>, u64)> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tracking_numbers WHERE tenant_id = ? AND status <> 'released'",
    )
    .bind(tenant_id.to_string())
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT t.id, t.number, t.tenant_id, t.marketing_source_id, t.provider_number_id, t.status,
               t.country, t.region, t.purchased_at, t.released_at, t.created_at, t.updated_at,
               r.forwarding_voice_number, r.recording_enabled
        FROM tracking_numbers t
        LEFT JOIN number_routes r
               ON r.tracking_number_id = t.id AND r.status = 'active'
        WHERE t.tenant_id = ? AND t.status <> 'released'
        ORDER BY t.created_at DESC, t.id
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(tenant_id.to_string())
    .bind(page.limit as i64)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let number = map_row(row)?;
        let mut view = TrackingNumberView::new(&number, None);
        view.forwarding_voice_number = row.get("forwarding_voice_number");
        view.recording_enabled = row
            .get::<Option<bool>, _>("recording_enabled")
            .unwrap_or(true);
        items.push(view);
    }

    Ok((items, total.max(0) as u64))
}
