//! Hourly rollup aggregation
//!
//! Volume is applied when a call reaches a terminal status; department KPIs
//! once the call is classified (or immediately for calls that never
//! connected). Each call claims a marker on its log row in the same
//! transaction as the counter upsert, so repeated triggers count once.

use calltrack_common::time::{hour_floor, local_day_bounds, now, parse_timezone};
use calltrack_common::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::db::rollups::{self, KpiDelta, VolumeBucket};
use crate::db::{call_logs, tenants};
use crate::models::{CallLog, CallResult};

/// Volume totals for one tenant-local calendar day
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeTotals {
    pub date: NaiveDate,
    pub timezone: String,
    pub window_start_utc: DateTime<Utc>,
    pub window_end_utc: DateTime<Utc>,
    pub total_calls: i64,
    pub total_seconds: i64,
    pub buckets: Vec<VolumeBucket>,
}

/// Counter increments contributed by one classified call
pub fn kpi_delta(call: &CallLog) -> KpiDelta {
    let connected = call.result != CallResult::NotConnected;
    KpiDelta {
        total_calls: 1,
        connected_calls: connected as i64,
        requested_appointments: (call.result == CallResult::AppointmentRequested) as i64,
        booked_appointments: (call.result == CallResult::AppointmentBooked) as i64,
        sentiment_sum: call.sentiment.map(i64::from).unwrap_or(0),
        sentiment_count: call.sentiment.is_some() as i64,
        total_seconds: call.duration_seconds.max(0),
    }
}

#[derive(Clone)]
pub struct HourlyRollupAggregator {
    db: SqlitePool,
}

impl HourlyRollupAggregator {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Add the call to its volume bucket; false if it was already counted
    pub async fn apply_volume(&self, call: &CallLog) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        if !call_logs::claim_volume_rollup(&mut *tx, call.id, now()).await? {
            debug!(call_sid = %call.provider_call_id, "Volume rollup already applied");
            return Ok(false);
        }

        rollups::increment_volume(
            &mut *tx,
            call.tenant_id,
            call.marketing_source_id,
            hour_floor(call.call_started_at),
            call.duration_seconds,
        )
        .await?;

        tx.commit().await?;
        debug!(call_sid = %call.provider_call_id, "Volume rollup applied");
        Ok(true)
    }

    /// Add the call to its department KPI bucket; false if already counted
    pub async fn apply_department_kpis(&self, call: &CallLog) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        if !call_logs::claim_kpi_rollup(&mut *tx, call.id, now()).await? {
            debug!(call_sid = %call.provider_call_id, "KPI rollup already applied");
            return Ok(false);
        }

        rollups::increment_department_kpis(
            &mut *tx,
            call.tenant_id,
            call.marketing_source_id,
            call.department,
            hour_floor(call.call_started_at),
            kpi_delta(call),
        )
        .await?;

        tx.commit().await?;
        debug!(
            call_sid = %call.provider_call_id,
            department = %call.department,
            result = %call.result,
            "KPI rollup applied"
        );
        Ok(true)
    }

    /// Sum the hourly volume buckets that start inside the tenant's local day
    ///
    /// Buckets are UTC hours, so a timezone with a sub-hour offset splits
    /// its first and last local hour across two buckets.
    pub async fn daily_volume(&self, tenant_id: Uuid, date: NaiveDate) -> Result<VolumeTotals> {
        let tenant = tenants::get_tenant(&self.db, tenant_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Tenant {}", tenant_id)))?;

        let tz = parse_timezone(&tenant.timezone)?;
        let (start, end) = local_day_bounds(tz, date)?;
        let buckets = rollups::volume_buckets(&self.db, tenant_id, start, end).await?;

        Ok(VolumeTotals {
            date,
            timezone: tenant.timezone,
            window_start_utc: start,
            window_end_utc: end,
            total_calls: buckets.iter().map(|b| b.total_calls).sum(),
            total_seconds: buckets.iter().map(|b| b.total_seconds).sum(),
            buckets,
        })
    }
}
