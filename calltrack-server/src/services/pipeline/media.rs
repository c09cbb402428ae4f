//! Stage A: copy recording media from the provider into object storage

use calltrack_common::retry::{retry_with_backoff, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clients::{ClientError, ObjectStore, TelephonyProvider};

/// Where to fetch a recording and where to store it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub url: String,
    pub key: String,
    pub content_type: &'static str,
}

/// Derive the fetch URL and deterministic object key for a call
///
/// Recording references without a media suffix are fetched as MP3.
pub fn media_source(call_sid: &str, recording_url: &str) -> MediaSource {
    let url = recording_url.trim();
    let lower = url.to_ascii_lowercase();

    let (url, ext, content_type) = if lower.ends_with(".wav") {
        (url.to_string(), "wav", "audio/wav")
    } else if lower.ends_with(".mp3") {
        (url.to_string(), "mp3", "audio/mpeg")
    } else {
        (format!("{}.mp3", url), "mp3", "audio/mpeg")
    };

    MediaSource {
        url,
        key: format!("calls/{}.{}", call_sid, ext),
        content_type,
    }
}

/// Ensure the recording is stored; returns the object key
///
/// Skips the provider entirely when the object is already present. Fetch
/// and upload are retried together since a partial stream cannot resume.
pub async fn acquire(
    telephony: &dyn TelephonyProvider,
    store: &dyn ObjectStore,
    call_sid: &str,
    recording_url: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<String, ClientError> {
    let source = media_source(call_sid, recording_url);

    if store.exists(&source.key).await? {
        debug!(call_sid, key = %source.key, "Recording already stored");
        return Ok(source.key);
    }

    let source_ref = &source;
    let bytes = retry_with_backoff(
        "recording copy",
        policy,
        cancel,
        ClientError::is_retryable,
        move |_attempt| async move {
            let media = telephony.fetch_recording(&source_ref.url).await?;
            let content_type = media
                .content_type
                .as_deref()
                .filter(|ct| ct.starts_with("audio/"))
                .unwrap_or(source_ref.content_type)
                .to_string();
            store.put_stream(&source_ref.key, &content_type, media.stream).await
        },
    )
    .await?;

    info!(call_sid, key = %source.key, bytes, "Recording stored");
    Ok(source.key)
}
