//! Call volume reporting

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::api::TenantId;
use crate::error::{ApiError, ApiResult};
use crate::services::VolumeTotals;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DailyVolumeQuery {
    /// Local calendar date, `YYYY-MM-DD`
    pub date: String,
}

/// GET /call-volume/daily?date=YYYY-MM-DD
///
/// Hourly volume buckets inside the tenant's local day.
pub async fn daily_volume(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Query(query): Query<DailyVolumeQuery>,
) -> ApiResult<Json<VolumeTotals>> {
    let date = NaiveDate::parse_from_str(query.date.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{}', expected YYYY-MM-DD", query.date)))?;
    let totals = state.track(state.rollups.daily_volume(tenant_id, date).await).await?;
    Ok(Json(totals))
}

pub fn rollup_routes() -> Router<AppState> {
    Router::new().route("/call-volume/daily", get(daily_volume))
}
