//! Outbound integrations
//!
//! Each external dependency sits behind a narrow trait so the services can
//! be assembled with real clients in `main` and with fakes in tests.

pub mod deepgram;
pub mod object_store;
pub mod openai;
pub mod twilio;

pub use deepgram::DeepgramClient;
pub use object_store::FsObjectStore;
pub use openai::OpenAiClient;
pub use twilio::{TwilioClient, WebhookVerifier};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Outbound client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// 429, 5xx, timeouts and connection failures
    #[error("Transient error: {0}")]
    Transient(String),

    /// Rejected request or bad credentials
    #[error("Request rejected: {0}")]
    Fatal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
        if status == StatusCode::NOT_FOUND {
            ClientError::NotFound(detail)
        } else if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            ClientError::Transient(detail)
        } else {
            ClientError::Fatal(detail)
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if err.is_builder() {
            ClientError::Fatal(err.to_string())
        } else {
            ClientError::Transient(err.to_string())
        }
    }
}

impl From<ClientError> for calltrack_common::Error {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transient(msg) => calltrack_common::Error::Transient(msg),
            ClientError::Fatal(msg) => calltrack_common::Error::Fatal(msg),
            ClientError::NotFound(msg) => calltrack_common::Error::NotFound(msg),
            ClientError::Decode(msg) => calltrack_common::Error::Fatal(format!("Decode error: {}", msg)),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Streamed response body
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Search for purchasable numbers
#[derive(Debug, Clone, PartialEq)]
pub struct AvailableNumberQuery {
    pub country: String,
    pub area_code: Option<String>,
    pub region: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableNumber {
    pub phone_number: String,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRequest {
    pub number: Option<String>,
    pub area_code: Option<String>,
    pub country: String,
    pub voice_url: String,
    pub status_callback_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchasedNumber {
    pub provider_number_id: String,
    pub phone_number: String,
    pub country: Option<String>,
    pub region: Option<String>,
}

/// Result of looking a leased number up by its E.164 value
#[derive(Debug, Clone, PartialEq)]
pub enum NumberLookup {
    Found(String),
    Missing,
    Ambiguous(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The provider no longer knows the number
    AlreadyGone,
}

/// Recording audio as a stream
pub struct RecordingMedia {
    pub content_type: Option<String>,
    pub stream: ByteStream,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Diarized utterance as returned by the speech-to-text provider
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub speaker: Option<u32>,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTranscript {
    pub utterances: Vec<Utterance>,
    pub duration_secs: Option<f64>,
    pub language: Option<String>,
}

/// Schema-constrained LLM request
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub schema_name: String,
    pub schema: serde_json::Value,
    pub instructions: String,
    pub input: String,
}

/// Leased phone numbers and recorded audio
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn list_available_numbers(
        &self,
        query: &AvailableNumberQuery,
    ) -> Result<Vec<AvailableNumber>, ClientError>;

    async fn purchase_number(&self, request: &PurchaseRequest) -> Result<PurchasedNumber, ClientError>;

    async fn find_number_id(&self, phone_number: &str) -> Result<NumberLookup, ClientError>;

    async fn release_number(&self, provider_number_id: &str) -> Result<ReleaseOutcome, ClientError>;

    async fn fetch_recording(&self, media_url: &str) -> Result<RecordingMedia, ClientError>;
}

/// Durable object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, ClientError>;

    /// Store the whole stream under `key`; returns bytes written
    async fn put_stream(&self, key: &str, content_type: &str, stream: ByteStream) -> Result<u64, ClientError>;

    async fn get(&self, key: &str) -> Result<StoredObject, ClientError>;

    /// Time-limited read URL
    fn signed_read_url(&self, key: &str, ttl: Duration) -> Result<String, ClientError>;

    /// Check a URL minted by `signed_read_url`
    fn verify_read_url(&self, key: &str, expires: i64, signature: &str) -> Result<(), ClientError>;
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe_url(&self, url: &str) -> Result<RawTranscript, ClientError>;

    async fn transcribe_bytes(&self, audio: Bytes, content_type: &str) -> Result<RawTranscript, ClientError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// `Ok(None)` when the model produced no usable output
    async fn structured(&self, request: &StructuredRequest) -> Result<Option<serde_json::Value>, ClientError>;
}
