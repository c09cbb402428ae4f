//! Call log persistence
//!
//! `provider_call_id` is the natural key. Every write is conditional so that
//! redelivered or reordered webhooks converge instead of overwriting.

use calltrack_common::time::{format_timestamp, now, parse_optional, parse_timestamp};
use calltrack_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_uuid, parse_uuid};
use crate::models::{
    CallDepartment, CallDirection, CallIntent, CallLog, CallResult, CallStatus, NewCallLog,
    TranscriptDocument,
};

const COLUMNS: &str = "id, tenant_id, tracking_number_id, marketing_source_id, provider_call_id, \
                       direction, status, caller_number, receiver_number, call_started_at, \
                       duration_seconds, recording_url, recording_object_key, transcript_text, \
                       transcript_json, result, intent, department, sentiment, classified_at, \
                       volume_rolled_up_at, kpi_rolled_up_at, created_at, updated_at";

fn map_row(row: &SqliteRow) -> Result<CallLog> {
    let id: String = row.get("id");
    let tenant_id: String = row.get("tenant_id");
    let tracking_number_id: String = row.get("tracking_number_id");
    let direction: String = row.get("direction");
    let status: String = row.get("status");
    let result: String = row.get("result");
    let intent: String = row.get("intent");
    let department: String = row.get("department");
    let call_started_at: String = row.get("call_started_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let transcript_json: Option<String> = row.get("transcript_json");
    let sentiment: Option<i64> = row.get("sentiment");

    let transcript = transcript_json
        .as_deref()
        .map(serde_json::from_str::<TranscriptDocument>)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize transcript: {}", e)))?;

    Ok(CallLog {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        tracking_number_id: parse_uuid(&tracking_number_id)?,
        marketing_source_id: parse_optional_uuid(row.get("marketing_source_id"))?,
        provider_call_id: row.get("provider_call_id"),
        direction: CallDirection::from_db(&direction)?,
        status: CallStatus::from_db(&status)?,
        caller_number: row.get("caller_number"),
        receiver_number: row.get("receiver_number"),
        call_started_at: parse_timestamp(&call_started_at)?,
        duration_seconds: row.get("duration_seconds"),
        recording_url: row.get("recording_url"),
        recording_object_key: row.get("recording_object_key"),
        transcript_text: row.get("transcript_text"),
        transcript,
        result: CallResult::from_db(&result)?,
        intent: CallIntent::from_db(&intent)?,
        department: CallDepartment::from_db(&department)?,
        sentiment: sentiment.map(|s| s.clamp(1, 5) as u8),
        classified_at: parse_optional(row.get("classified_at"))?,
        volume_rolled_up_at: parse_optional(row.get("volume_rolled_up_at"))?,
        kpi_rolled_up_at: parse_optional(row.get("kpi_rolled_up_at"))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Create the call log unless the provider call id already exists
///
/// Returns false for a redelivered voice-start event.
pub async fn insert_if_absent(pool: &SqlitePool, call: &NewCallLog) -> Result<bool> {
    let stamp = format_timestamp(now());
    let result = sqlx::query(
        r#"
        INSERT INTO call_logs (
            id, tenant_id, tracking_number_id, marketing_source_id, provider_call_id,
            direction, status, caller_number, receiver_number, call_started_at,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 'inbound', 'in-progress', ?, ?, ?, ?, ?)
        ON CONFLICT (provider_call_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(call.tenant_id.to_string())
    .bind(call.tracking_number_id.to_string())
    .bind(call.marketing_source_id.map(|id| id.to_string()))
    .bind(&call.provider_call_id)
    .bind(&call.caller_number)
    .bind(&call.receiver_number)
    .bind(format_timestamp(call.call_started_at))
    .bind(&stamp)
    .bind(&stamp)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn find_by_provider_id<'e, E>(executor: E, provider_call_id: &str) -> Result<Option<CallLog>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM call_logs WHERE provider_call_id = ?",
        COLUMNS
    ))
    .bind(provider_call_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(map_row).transpose()
}

/// Apply a status event if it moves the call forward
///
/// A stale or repeated event leaves the row untouched and returns false.
/// `duration` and `result` of `None` leave the stored values untouched.
pub async fn apply_status(
    pool: &SqlitePool,
    provider_call_id: &str,
    status: CallStatus,
    duration_seconds: Option<i64>,
    result: Option<CallResult>,
) -> Result<bool> {
    let superseded = status.supersedes();
    if superseded.is_empty() {
        return Ok(false);
    }

    let placeholders = vec!["?"; superseded.len()].join(", ");
    let sql = format!(
        r#"
        UPDATE call_logs
        SET status = ?,
            duration_seconds = COALESCE(?, duration_seconds),
            result = COALESCE(?, result),
            updated_at = ?
        WHERE provider_call_id = ? AND status IN ({})
        "#,
        placeholders
    );

    let mut query = sqlx::query(&sql)
        .bind(status.as_str())
        .bind(duration_seconds)
        .bind(result.map(|r| r.as_str()))
        .bind(format_timestamp(now()))
        .bind(provider_call_id);
    for stored in &superseded {
        query = query.bind(stored.as_str());
    }

    let outcome = query.execute(pool).await?;
    Ok(outcome.rows_affected() == 1)
}

/// Persist the raw provider recording reference; false for an unknown call
pub async fn set_recording_url(pool: &SqlitePool, provider_call_id: &str, url: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE call_logs SET recording_url = ?, updated_at = ? WHERE provider_call_id = ?",
    )
    .bind(url)
    .bind(format_timestamp(now()))
    .bind(provider_call_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the storage key after a confirmed upload
pub async fn set_object_key(pool: &SqlitePool, provider_call_id: &str, key: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE call_logs SET recording_object_key = ?, updated_at = ?
        WHERE provider_call_id = ? AND recording_object_key IS NULL
        "#,
    )
    .bind(key)
    .bind(format_timestamp(now()))
    .bind(provider_call_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Store the transcript once; a concurrent writer that got there first wins
pub async fn set_transcript(
    pool: &SqlitePool,
    provider_call_id: &str,
    text: &str,
    document: &TranscriptDocument,
) -> Result<bool> {
    let json = serde_json::to_string(document)
        .map_err(|e| Error::Internal(format!("Failed to serialize transcript: {}", e)))?;

    let result = sqlx::query(
        r#"
        UPDATE call_logs SET transcript_text = ?, transcript_json = ?, updated_at = ?
        WHERE provider_call_id = ? AND transcript_text IS NULL
        "#,
    )
    .bind(text)
    .bind(json)
    .bind(format_timestamp(now()))
    .bind(provider_call_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Write all four classification fields once and stamp `classified_at`
pub async fn set_classification<'e, E>(
    executor: E,
    provider_call_id: &str,
    intent: CallIntent,
    result: CallResult,
    department: CallDepartment,
    sentiment: u8,
) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let stamp = format_timestamp(now());
    let outcome = sqlx::query(
        r#"
        UPDATE call_logs
        SET intent = ?, result = ?, department = ?, sentiment = ?,
            classified_at = ?, updated_at = ?
        WHERE provider_call_id = ? AND classified_at IS NULL
        "#,
    )
    .bind(intent.as_str())
    .bind(result.as_str())
    .bind(department.as_str())
    .bind(sentiment as i64)
    .bind(&stamp)
    .bind(&stamp)
    .bind(provider_call_id)
    .execute(executor)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

/// Claim the volume rollup for a call; false if already applied
pub async fn claim_volume_rollup<'e, E>(executor: E, id: Uuid, stamp: DateTime<Utc>) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE call_logs SET volume_rolled_up_at = ? WHERE id = ? AND volume_rolled_up_at IS NULL",
    )
    .bind(format_timestamp(stamp))
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Claim the department-KPI rollup for a call; false if already applied
pub async fn claim_kpi_rollup<'e, E>(executor: E, id: Uuid, stamp: DateTime<Utc>) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE call_logs SET kpi_rolled_up_at = ? WHERE id = ? AND kpi_rolled_up_at IS NULL",
    )
    .bind(format_timestamp(stamp))
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Calls started within `[start, end)` for a tenant
pub async fn count_started_between(
    pool: &SqlitePool,
    tenant_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM call_logs
        WHERE tenant_id = ? AND call_started_at >= ? AND call_started_at < ?
        "#,
    )
    .bind(tenant_id.to_string())
    .bind(format_timestamp(start))
    .bind(format_timestamp(end))
    .fetch_one(pool)
    .await?;

    Ok(count)
}
