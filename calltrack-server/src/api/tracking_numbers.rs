//! Tracking number management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use calltrack_common::pagination::{PageQuery, Paginated};
use uuid::Uuid;

use crate::api::TenantId;
use crate::clients::AvailableNumber;
use crate::error::ApiResult;
use crate::models::{AvailableNumberParams, ProvisionBody, TrackingNumberView, UpdateBody};
use crate::services::ReleaseResult;
use crate::AppState;

/// GET /tracking-numbers/available
///
/// Purchasable numbers at the provider.
///
/// **Query:** `country` (default US), `areaCode`, `region`, `limit` (1..=50, default 10)
///
/// **Errors:**
/// - 400: Invalid filter
/// - 502/503: Provider rejected or unavailable
pub async fn list_available(
    State(state): State<AppState>,
    _tenant: TenantId,
    Query(params): Query<AvailableNumberParams>,
) -> ApiResult<Json<Vec<AvailableNumber>>> {
    let query = params.validate()?;
    let numbers = state
        .track(state.provisioner.available_numbers(&query).await)
        .await?;
    Ok(Json(numbers))
}

/// GET /tracking-numbers
///
/// Active tracking numbers of the tenant with their forwarding numbers.
pub async fn list_tracking_numbers(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Paginated<TrackingNumberView>>> {
    let page = page.validate()?;
    let result = state.track(state.provisioner.list(tenant_id, page).await).await?;
    Ok(Json(result))
}

/// POST /tracking-numbers
///
/// Buy a number and attach a forwarding route.
///
/// **Request:**
/// ```json
/// {"areaCode": "312", "forwardingVoiceNumber": "+13125550100", "marketingSourceId": "..."}
/// ```
///
/// **Errors:**
/// - 400: Invalid body
/// - 404: Unknown tenant or marketing source
/// - 409: Tenant has no free tracking number capacity
/// - 502/503: Provider purchase failed
pub async fn provision_tracking_number(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Json(body): Json<ProvisionBody>,
) -> ApiResult<(StatusCode, Json<TrackingNumberView>)> {
    let request = body.validate()?;
    let view = state
        .track(state.provisioner.provision(tenant_id, request).await)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// PATCH /tracking-numbers/:id
///
/// **Request:** any of `forwardingVoiceNumber` (null retires the route),
/// `marketingSourceId` (null detaches), plus optional `expectedUpdatedAt`.
///
/// **Errors:**
/// - 400: Empty patch or number not active
/// - 404: Unknown number
/// - 409: Concurrent modification
pub async fn update_tracking_number(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateBody>,
) -> ApiResult<Json<TrackingNumberView>> {
    let patch = body.validate()?;
    let view = state
        .track(state.provisioner.update(tenant_id, id, patch).await)
        .await?;
    Ok(Json(view))
}

/// DELETE /tracking-numbers/:id
///
/// Releases the number at the provider. A provider-side problem is reported
/// as `{"released": false, "reason": ...}` with the number left active.
pub async fn release_tracking_number(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ReleaseResult>> {
    let result = state.track(state.provisioner.release(tenant_id, id).await).await?;
    Ok(Json(result))
}

/// Build tracking number routes
pub fn tracking_number_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tracking-numbers",
            get(list_tracking_numbers).post(provision_tracking_number),
        )
        .route("/tracking-numbers/available", get(list_available))
        .route(
            "/tracking-numbers/:id",
            patch(update_tracking_number).delete(release_tracking_number),
        )
}
