//! Number route persistence
//!
//! At most one route per tracking number is active; the partial unique index
//! `uq_active_route_per_tn` enforces it and doubles as the upsert target.

use calltrack_common::time::{format_timestamp, now, parse_optional, parse_timestamp};
use calltrack_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::{NumberRoute, RouteStatus};

fn map_row(row: &SqliteRow) -> Result<NumberRoute> {
    let id: String = row.get("id");
    let tracking_number_id: String = row.get("tracking_number_id");
    let status: String = row.get("status");
    let rules: Option<String> = row.get("rules");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    let rules = rules
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize route rules: {}", e)))?;

    Ok(NumberRoute {
        id: parse_uuid(&id)?,
        tracking_number_id: parse_uuid(&tracking_number_id)?,
        status: RouteStatus::from_db(&status)?,
        forwarding_voice_number: row.get("forwarding_voice_number"),
        recording_enabled: row.get("recording_enabled"),
        effective_from: parse_optional(row.get("effective_from"))?,
        effective_to: parse_optional(row.get("effective_to"))?,
        rules,
        deleted_at: parse_optional(row.get("deleted_at"))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn find_active<'e, E>(executor: E, tracking_number_id: Uuid) -> Result<Option<NumberRoute>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, tracking_number_id, status, forwarding_voice_number, recording_enabled,
               effective_from, effective_to, rules, deleted_at, created_at, updated_at
        FROM number_routes
        WHERE tracking_number_id = ? AND status = 'active'
        "#,
    )
    .bind(tracking_number_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(map_row).transpose()
}

pub async fn insert<'e, E>(executor: E, route: &NumberRoute) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let rules = route
        .rules
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize route rules: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO number_routes (
            id, tracking_number_id, status, forwarding_voice_number, recording_enabled,
            effective_from, effective_to, rules, deleted_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(route.id.to_string())
    .bind(route.tracking_number_id.to_string())
    .bind(route.status.as_str())
    .bind(&route.forwarding_voice_number)
    .bind(route.recording_enabled)
    .bind(route.effective_from.map(format_timestamp))
    .bind(route.effective_to.map(format_timestamp))
    .bind(rules)
    .bind(route.deleted_at.map(format_timestamp))
    .bind(format_timestamp(route.created_at))
    .bind(format_timestamp(route.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

/// Compare-and-swap the forwarding number of an active route
pub async fn cas_update_forwarding<'e, E>(
    executor: E,
    route_id: Uuid,
    expected_updated_at: DateTime<Utc>,
    new_updated_at: DateTime<Utc>,
    forwarding_voice_number: &str,
) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE number_routes
        SET forwarding_voice_number = ?, updated_at = ?
        WHERE id = ? AND updated_at = ? AND status = 'active'
        "#,
    )
    .bind(forwarding_voice_number)
    .bind(format_timestamp(new_updated_at))
    .bind(route_id.to_string())
    .bind(format_timestamp(expected_updated_at))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Insert an active route, or update the one that already holds the slot
pub async fn upsert_active_forwarding<'e, E>(
    executor: E,
    tracking_number_id: Uuid,
    forwarding_voice_number: &str,
    stamp: DateTime<Utc>,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let stamp = format_timestamp(stamp);
    sqlx::query(
        r#"
        INSERT INTO number_routes (
            id, tracking_number_id, status, forwarding_voice_number, recording_enabled,
            effective_from, created_at, updated_at
        ) VALUES (?, ?, 'active', ?, 1, ?, ?, ?)
        ON CONFLICT (tracking_number_id) WHERE status = 'active' DO UPDATE SET
            forwarding_voice_number = excluded.forwarding_voice_number,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(tracking_number_id.to_string())
    .bind(forwarding_voice_number)
    .bind(&stamp)
    .bind(&stamp)
    .bind(&stamp)
    .execute(executor)
    .await?;
    Ok(())
}

/// Compare-and-swap an active route to deleted
pub async fn cas_retire<'e, E>(
    executor: E,
    route_id: Uuid,
    expected_updated_at: DateTime<Utc>,
    new_updated_at: DateTime<Utc>,
) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let stamp = format_timestamp(new_updated_at);
    let result = sqlx::query(
        r#"
        UPDATE number_routes
        SET status = 'deleted', deleted_at = ?, effective_to = ?, updated_at = ?
        WHERE id = ? AND updated_at = ? AND status = 'active'
        "#,
    )
    .bind(&stamp)
    .bind(&stamp)
    .bind(&stamp)
    .bind(route_id.to_string())
    .bind(format_timestamp(expected_updated_at))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Soft-delete whatever route is active for a tracking number
pub async fn retire_active<'e, E>(executor: E, tracking_number_id: Uuid) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let stamp = format_timestamp(now());
    let result = sqlx::query(
        r#"
        UPDATE number_routes
        SET status = 'deleted', deleted_at = ?, effective_to = ?, updated_at = ?
        WHERE tracking_number_id = ? AND status = 'active'
        "#,
    )
    .bind(&stamp)
    .bind(&stamp)
    .bind(&stamp)
    .bind(tracking_number_id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
