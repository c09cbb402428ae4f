//! Hourly rollup counters
//!
//! Writes are upsert-increments: on key conflict counters are added, never
//! overwritten. A missing marketing source is keyed as ''.

use calltrack_common::time::{format_timestamp, now, parse_timestamp};
use calltrack_common::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::models::CallDepartment;

/// Rollup key value for a nullable marketing source
pub fn source_key(marketing_source_id: Option<Uuid>) -> String {
    marketing_source_id.map(|id| id.to_string()).unwrap_or_default()
}

/// Counter increments for one call in a department bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KpiDelta {
    pub total_calls: i64,
    pub connected_calls: i64,
    pub requested_appointments: i64,
    pub booked_appointments: i64,
    pub sentiment_sum: i64,
    pub sentiment_count: i64,
    pub total_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeBucket {
    pub bucket_start_utc: DateTime<Utc>,
    pub total_calls: i64,
    pub total_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentBucket {
    pub bucket_start_utc: DateTime<Utc>,
    pub total_calls: i64,
    pub connected_calls: i64,
    pub requested_appointments: i64,
    pub booked_appointments: i64,
    pub sentiment_sum: i64,
    pub sentiment_count: i64,
    pub total_seconds: i64,
}

pub async fn increment_volume<'e, E>(
    executor: E,
    tenant_id: Uuid,
    marketing_source_id: Option<Uuid>,
    bucket_start: DateTime<Utc>,
    seconds: i64,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO call_volume_hourly (
            tenant_id, marketing_source_id, bucket_start_utc, total_calls, total_seconds, updated_at
        ) VALUES (?, ?, ?, 1, ?, ?)
        ON CONFLICT (tenant_id, marketing_source_id, bucket_start_utc) DO UPDATE SET
            total_calls = total_calls + excluded.total_calls,
            total_seconds = total_seconds + excluded.total_seconds,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tenant_id.to_string())
    .bind(source_key(marketing_source_id))
    .bind(format_timestamp(bucket_start))
    .bind(seconds.max(0))
    .bind(format_timestamp(now()))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn increment_department_kpis<'e, E>(
    executor: E,
    tenant_id: Uuid,
    marketing_source_id: Option<Uuid>,
    department: CallDepartment,
    bucket_start: DateTime<Utc>,
    delta: KpiDelta,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO call_department_hourly_kpis (
            tenant_id, marketing_source_id, department, bucket_start_utc,
            total_calls, connected_calls, requested_appointments, booked_appointments,
            sentiment_sum, sentiment_count, total_seconds, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (tenant_id, marketing_source_id, department, bucket_start_utc) DO UPDATE SET
            total_calls = total_calls + excluded.total_calls,
            connected_calls = connected_calls + excluded.connected_calls,
            requested_appointments = requested_appointments + excluded.requested_appointments,
            booked_appointments = booked_appointments + excluded.booked_appointments,
            sentiment_sum = sentiment_sum + excluded.sentiment_sum,
            sentiment_count = sentiment_count + excluded.sentiment_count,
            total_seconds = total_seconds + excluded.total_seconds,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tenant_id.to_string())
    .bind(source_key(marketing_source_id))
    .bind(department.as_str())
    .bind(format_timestamp(bucket_start))
    .bind(delta.total_calls)
    .bind(delta.connected_calls)
    .bind(delta.requested_appointments)
    .bind(delta.booked_appointments)
    .bind(delta.sentiment_sum)
    .bind(delta.sentiment_count)
    .bind(delta.total_seconds.max(0))
    .bind(format_timestamp(now()))
    .execute(executor)
    .await?;
    Ok(())
}

/// Volume buckets for a tenant starting within `[start, end)`, all sources
pub async fn volume_buckets(
    pool: &SqlitePool,
    tenant_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<VolumeBucket>> {
    let rows = sqlx::query(
        r#"
        SELECT bucket_start_utc,
               SUM(total_calls) AS total_calls,
               SUM(total_seconds) AS total_seconds
        FROM call_volume_hourly
        WHERE tenant_id = ? AND bucket_start_utc >= ? AND bucket_start_utc < ?
        GROUP BY bucket_start_utc
        ORDER BY bucket_start_utc
        "#,
    )
    .bind(tenant_id.to_string())
    .bind(format_timestamp(start))
    .bind(format_timestamp(end))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let bucket: String = row.get("bucket_start_utc");
            Ok(VolumeBucket {
                bucket_start_utc: parse_timestamp(&bucket)?,
                total_calls: row.get("total_calls"),
                total_seconds: row.get("total_seconds"),
            })
        })
        .collect()
}

/// Single department bucket, if any counters exist for it
pub async fn department_bucket(
    pool: &SqlitePool,
    tenant_id: Uuid,
    marketing_source_id: Option<Uuid>,
    department: CallDepartment,
    bucket_start: DateTime<Utc>,
) -> Result<Option<DepartmentBucket>> {
    let row = sqlx::query(
        r#"
        SELECT bucket_start_utc, total_calls, connected_calls, requested_appointments,
               booked_appointments, sentiment_sum, sentiment_count, total_seconds
        FROM call_department_hourly_kpis
        WHERE tenant_id = ? AND marketing_source_id = ? AND department = ? AND bucket_start_utc = ?
        "#,
    )
    .bind(tenant_id.to_string())
    .bind(source_key(marketing_source_id))
    .bind(department.as_str())
    .bind(format_timestamp(bucket_start))
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let bucket: String = row.get("bucket_start_utc");
        Ok(DepartmentBucket {
            bucket_start_utc: parse_timestamp(&bucket)?,
            total_calls: row.get("total_calls"),
            connected_calls: row.get("connected_calls"),
            requested_appointments: row.get("requested_appointments"),
            booked_appointments: row.get("booked_appointments"),
            sentiment_sum: row.get("sentiment_sum"),
            sentiment_count: row.get("sentiment_count"),
            total_seconds: row.get("total_seconds"),
        })
    })
    .transpose()
}
