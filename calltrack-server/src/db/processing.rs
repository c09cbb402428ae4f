//! Per-call pipeline ledger
//!
//! One row per provider call id: attempts, last stage reached, last error
//! and when the retry sweep should pick the call up again.

use calltrack_common::time::{format_timestamp, now, parse_optional};
use calltrack_common::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    pub provider_call_id: String,
    pub recording_url: String,
    pub attempts: u32,
    pub last_stage: Option<String>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Count a new attempt and clear any pending schedule; returns the count
pub async fn record_attempt(pool: &SqlitePool, provider_call_id: &str, recording_url: &str) -> Result<u32> {
    let stamp = format_timestamp(now());
    let attempts: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO call_processing (
            provider_call_id, recording_url, attempts, created_at, updated_at
        ) VALUES (?, ?, 1, ?, ?)
        ON CONFLICT (provider_call_id) DO UPDATE SET
            recording_url = excluded.recording_url,
            attempts = attempts + 1,
            next_attempt_at = NULL,
            updated_at = excluded.updated_at
        RETURNING attempts
        "#,
    )
    .bind(provider_call_id)
    .bind(recording_url)
    .bind(&stamp)
    .bind(&stamp)
    .fetch_one(pool)
    .await?;

    Ok(attempts.max(0) as u32)
}

pub async fn record_stage(pool: &SqlitePool, provider_call_id: &str, stage: &str) -> Result<()> {
    sqlx::query("UPDATE call_processing SET last_stage = ?, updated_at = ? WHERE provider_call_id = ?")
        .bind(stage)
        .bind(format_timestamp(now()))
        .bind(provider_call_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_completed(pool: &SqlitePool, provider_call_id: &str) -> Result<()> {
    let stamp = format_timestamp(now());
    sqlx::query(
        r#"
        UPDATE call_processing
        SET completed_at = ?, next_attempt_at = NULL, last_error = NULL, updated_at = ?
        WHERE provider_call_id = ?
        "#,
    )
    .bind(&stamp)
    .bind(&stamp)
    .bind(provider_call_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failure; `next_attempt_at` of `None` means no further retries
pub async fn record_failure(
    pool: &SqlitePool,
    provider_call_id: &str,
    stage: &str,
    error: &str,
    next_attempt_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE call_processing
        SET last_stage = ?, last_error = ?, next_attempt_at = ?, updated_at = ?
        WHERE provider_call_id = ?
        "#,
    )
    .bind(stage)
    .bind(error)
    .bind(next_attempt_at.map(format_timestamp))
    .bind(format_timestamp(now()))
    .bind(provider_call_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Incomplete calls whose retry time has passed
pub async fn due(pool: &SqlitePool, at: DateTime<Utc>, limit: u32) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT provider_call_id, recording_url
        FROM call_processing
        WHERE completed_at IS NULL AND next_attempt_at IS NOT NULL AND next_attempt_at <= ?
        ORDER BY next_attempt_at
        LIMIT ?
        "#,
    )
    .bind(format_timestamp(at))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("provider_call_id"), row.get("recording_url")))
        .collect())
}

pub async fn get(pool: &SqlitePool, provider_call_id: &str) -> Result<Option<ProcessingRecord>> {
    let row = sqlx::query(
        r#"
        SELECT provider_call_id, recording_url, attempts, last_stage, last_error,
               next_attempt_at, completed_at
        FROM call_processing
        WHERE provider_call_id = ?
        "#,
    )
    .bind(provider_call_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let attempts: i64 = row.get("attempts");
        Ok(ProcessingRecord {
            provider_call_id: row.get("provider_call_id"),
            recording_url: row.get("recording_url"),
            attempts: attempts.max(0) as u32,
            last_stage: row.get("last_stage"),
            last_error: row.get("last_error"),
            next_attempt_at: parse_optional(row.get("next_attempt_at"))?,
            completed_at: parse_optional(row.get("completed_at"))?,
        })
    })
    .transpose()
}
