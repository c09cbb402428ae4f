//! Signed media downloads

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use calltrack_common::Error;
use serde::Deserialize;

use crate::clients::ClientError;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedParams {
    pub expires: i64,
    pub signature: String,
}

/// GET /media/*key?expires=&signature=
///
/// Serves an object minted by the store's signed read URL.
///
/// **Errors:**
/// - 401: Bad or expired signature
/// - 404: Object missing
pub async fn get_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<SignedParams>,
) -> ApiResult<impl IntoResponse> {
    state
        .object_store
        .verify_read_url(&key, params.expires, &params.signature)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let object = match state.object_store.get(&key).await {
        Ok(object) => object,
        Err(ClientError::NotFound(msg)) => return Err(ApiError::NotFound(msg)),
        Err(err) => {
            let err = Error::from(err);
            state.record_error(&err).await;
            return Err(err.into());
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        object.bytes,
    ))
}

pub fn media_routes() -> Router<AppState> {
    Router::new().route("/media/*key", get(get_media))
}
