//! Provider webhook endpoints
//!
//! Every request is signature-checked against the configured public base URL
//! before anything is read or written.

use axum::{
    extract::{OriginalUri, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::post,
    Form, Json, Router,
};

use crate::error::ApiResult;
use crate::models::WebhookRequest;
use crate::services::{RecordingOutcome, StatusOutcome};
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

fn webhook_request(uri: &OriginalUri, headers: &HeaderMap, params: Vec<(String, String)>) -> WebhookRequest {
    let path = uri
        .0
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.0.path().to_string());
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    WebhookRequest::new(path, params, signature)
}

/// POST /twilio/voice
///
/// Inbound call. Responds with TwiML forwarding (or declining) the call.
///
/// **Errors:**
/// - 400: Missing CallSid/To
/// - 401: Bad signature
pub async fn voice(
    State(state): State<AppState>,
    uri: OriginalUri,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> ApiResult<impl IntoResponse> {
    let request = webhook_request(&uri, &headers, params);
    let instructions = state.track(state.gateway.on_voice_start(&request).await).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/xml"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        instructions.to_twiml(),
    ))
}

/// POST /twilio/call-status
///
/// Status callback. Unknown call ids are acknowledged with `knownCall: false`.
pub async fn call_status(
    State(state): State<AppState>,
    uri: OriginalUri,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> ApiResult<Json<StatusOutcome>> {
    let request = webhook_request(&uri, &headers, params);
    let outcome = state.track(state.gateway.on_status_change(&request).await).await?;
    Ok(Json(outcome))
}

/// POST /twilio/recording
///
/// Recording status callback. Completed recordings are handed to the
/// ingest pipeline; other statuses are acknowledged and ignored.
pub async fn recording(
    State(state): State<AppState>,
    uri: OriginalUri,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> ApiResult<Json<RecordingOutcome>> {
    let request = webhook_request(&uri, &headers, params);
    let outcome = state.track(state.gateway.on_recording_ready(&request).await).await?;
    Ok(Json(outcome))
}

/// Build webhook routes
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/twilio/voice", post(voice))
        .route("/twilio/call-status", post(call_status))
        .route("/twilio/recording", post(recording))
}
