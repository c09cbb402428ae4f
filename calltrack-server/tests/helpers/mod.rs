//! Shared integration test fixtures
//!
//! Temp-file database plus fake outbound clients that count their calls.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use calltrack_server::clients::twilio::{compute_signature, WebhookVerifier};
use calltrack_server::clients::{
    AvailableNumber, AvailableNumberQuery, ByteStream, ClientError, LanguageModel, NumberLookup,
    ObjectStore, PurchaseRequest, PurchasedNumber, RawTranscript, RecordingMedia,
    ReleaseOutcome, SpeechToText, StoredObject, StructuredRequest, TelephonyProvider, Utterance,
};
use calltrack_server::db::tenants;
use calltrack_server::models::{ProvisionRequest, Tenant, TrackingNumberView, WebhookRequest};
use calltrack_server::services::PipelineSettings;
use calltrack_server::{AppState, Clients};
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const BASE_URL: &str = "https://calls.example.com";
pub const AUTH_TOKEN: &str = "test-auth-token";
pub const FORWARD_TO: &str = "+13125550199";

fn counter(c: &AtomicUsize) -> usize {
    c.fetch_add(1, Ordering::SeqCst) + 1
}

/// Telephony fake handing out sequential numbers
#[derive(Default)]
pub struct FakeTelephony {
    pub purchases: AtomicUsize,
    pub releases: AtomicUsize,
    pub lookups: AtomicUsize,
    pub fetches: AtomicUsize,
    pub fail_purchase: AtomicBool,
    pub fail_release: AtomicBool,
    pub fail_fetch: AtomicBool,
    /// When set, every purchase returns this number
    pub fixed_number: Mutex<Option<String>>,
}

#[async_trait]
impl TelephonyProvider for FakeTelephony {
    async fn list_available_numbers(
        &self,
        query: &AvailableNumberQuery,
    ) -> Result<Vec<AvailableNumber>, ClientError> {
        let area = query.area_code.clone().unwrap_or_else(|| "312".to_string());
        Ok((0..query.limit.min(3))
            .map(|i| AvailableNumber {
                phone_number: format!("+1{}555{:04}", area, i),
                locality: Some("Chicago".into()),
                region: Some("IL".into()),
                country: Some(query.country.clone()),
            })
            .collect())
    }

    async fn purchase_number(&self, request: &PurchaseRequest) -> Result<PurchasedNumber, ClientError> {
        let n = counter(&self.purchases);
        if self.fail_purchase.load(Ordering::SeqCst) {
            return Err(ClientError::Fatal("number no longer available".into()));
        }
        let fixed = self.fixed_number.lock().unwrap().clone();
        let phone_number = fixed
            .or_else(|| request.number.clone())
            .unwrap_or_else(|| format!("+1312555{:04}", n));
        Ok(PurchasedNumber {
            provider_number_id: format!("PN{:04}", n),
            phone_number,
            country: Some(request.country.clone()),
            region: Some("IL".into()),
        })
    }

    async fn find_number_id(&self, phone_number: &str) -> Result<NumberLookup, ClientError> {
        counter(&self.lookups);
        Ok(NumberLookup::Found(format!("PN-{}", phone_number)))
    }

    async fn release_number(&self, _provider_number_id: &str) -> Result<ReleaseOutcome, ClientError> {
        counter(&self.releases);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ClientError::Transient("provider unavailable".into()));
        }
        Ok(ReleaseOutcome::Released)
    }

    async fn fetch_recording(&self, _media_url: &str) -> Result<RecordingMedia, ClientError> {
        counter(&self.fetches);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ClientError::Transient("recording not ready".into()));
        }
        let chunks: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b"ID3fake")),
            Ok(Bytes::from_static(b"-audio")),
        ];
        Ok(RecordingMedia {
            content_type: Some("audio/mpeg".into()),
            stream: stream::iter(chunks).boxed(),
        })
    }
}

/// In-memory object store
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<String, StoredObject>>,
    pub puts: AtomicUsize,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, ClientError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn put_stream(&self, key: &str, content_type: &str, mut stream: ByteStream) -> Result<u64, ClientError> {
        counter(&self.puts);
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        let size = data.len() as u64;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes: Bytes::from(data),
                content_type: content_type.to_string(),
            },
        );
        Ok(size)
    }

    async fn get(&self, key: &str) -> Result<StoredObject, ClientError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(key.to_string()))
    }

    fn signed_read_url(&self, key: &str, _ttl: Duration) -> Result<String, ClientError> {
        Ok(format!("{}/media/{}?expires=0&signature=test", BASE_URL, key))
    }

    fn verify_read_url(&self, _key: &str, _expires: i64, signature: &str) -> Result<(), ClientError> {
        if signature == "test" {
            Ok(())
        } else {
            Err(ClientError::Fatal("Invalid signature".into()))
        }
    }
}

/// Speech-to-text fake returning a fixed conversation
pub struct FakeStt {
    pub url_calls: AtomicUsize,
    pub byte_calls: AtomicUsize,
    pub utterances: Mutex<Vec<Utterance>>,
}

impl Default for FakeStt {
    fn default() -> Self {
        Self {
            url_calls: AtomicUsize::new(0),
            byte_calls: AtomicUsize::new(0),
            utterances: Mutex::new(dealership_conversation()),
        }
    }
}

impl FakeStt {
    fn transcript(&self) -> RawTranscript {
        RawTranscript {
            utterances: self.utterances.lock().unwrap().clone(),
            duration_secs: Some(41.6),
            language: Some("en".into()),
        }
    }

    pub fn calls(&self) -> usize {
        self.url_calls.load(Ordering::SeqCst) + self.byte_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe_url(&self, _url: &str) -> Result<RawTranscript, ClientError> {
        counter(&self.url_calls);
        Ok(self.transcript())
    }

    async fn transcribe_bytes(&self, _audio: Bytes, _content_type: &str) -> Result<RawTranscript, ClientError> {
        counter(&self.byte_calls);
        Ok(self.transcript())
    }
}

fn utterance(speaker: u32, start: f64, end: f64, text: &str) -> Utterance {
    Utterance {
        speaker: Some(speaker),
        start,
        end,
        text: text.to_string(),
    }
}

pub fn dealership_conversation() -> Vec<Utterance> {
    vec![
        utterance(0, 0.0, 3.0, "Thanks for calling, how can I help you today?"),
        utterance(1, 3.5, 8.0, "Hi, I'd like to come in and test drive the new SUV."),
        utterance(0, 8.5, 12.0, "Sure, I can book an appointment for Saturday at ten."),
        utterance(1, 12.5, 15.0, "Perfect, see you then."),
        utterance(0, 15.5, 17.0, "Great, you're all set."),
    ]
}

/// Language model fake answering both structured requests
pub struct FakeLlm {
    pub calls: AtomicUsize,
    pub analysis: Mutex<Value>,
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            analysis: Mutex::new(json!({
                "intent": "appointment",
                "result": "appointment_booked",
                "department": "sales",
                "sentiment": 4
            })),
        }
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn structured(&self, request: &StructuredRequest) -> Result<Option<Value>, ClientError> {
        counter(&self.calls);
        match request.schema_name.as_str() {
            "roles_schema" => Ok(Some(json!({"speaker0": "salesperson", "speaker1": "client"}))),
            "analysis_schema" => Ok(Some(self.analysis.lock().unwrap().clone())),
            other => Err(ClientError::Fatal(format!("unexpected schema {}", other))),
        }
    }
}

/// Fully wired application over fakes
pub struct TestApp {
    pub _dir: TempDir,
    pub db: SqlitePool,
    pub state: AppState,
    pub telephony: Arc<FakeTelephony>,
    pub store: Arc<MemoryStore>,
    pub stt: Arc<FakeStt>,
    pub llm: Arc<FakeLlm>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(true).await
    }

    /// No language model configured; classification uses heuristics
    pub async fn without_llm() -> Self {
        Self::build(false).await
    }

    async fn build(with_llm: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let db = calltrack_common::db::init_database(&dir.path().join("calltrack-test.db"))
            .await
            .unwrap();

        let telephony = Arc::new(FakeTelephony::default());
        let store = Arc::new(MemoryStore::default());
        let stt = Arc::new(FakeStt::default());
        let llm = Arc::new(FakeLlm::default());

        let clients = Clients {
            telephony: telephony.clone(),
            store: store.clone(),
            stt: stt.clone(),
            llm: if with_llm {
                Some(llm.clone() as Arc<dyn LanguageModel>)
            } else {
                None
            },
            verifier: WebhookVerifier::new(AUTH_TOKEN, BASE_URL),
        };

        let settings = PipelineSettings {
            inline: true,
            media_fetch_attempts: 2,
            ..PipelineSettings::default()
        };

        let state = AppState::new(db.clone(), clients, BASE_URL, settings, CancellationToken::new());

        Self {
            _dir: dir,
            db,
            state,
            telephony,
            store,
            stt,
            llm,
        }
    }

    pub async fn seed_tenant(&self, max_tracking_numbers: i64) -> Uuid {
        self.seed_tenant_in(max_tracking_numbers, "America/Chicago").await
    }

    pub async fn seed_tenant_in(&self, max_tracking_numbers: i64, timezone: &str) -> Uuid {
        let id = Uuid::new_v4();
        tenants::insert_tenant(
            &self.db,
            &Tenant {
                id,
                name: "Lakeside Motors".into(),
                timezone: timezone.into(),
                max_tracking_numbers,
                tracking_numbers_used_count: 0,
            },
        )
        .await
        .unwrap();
        id
    }

    pub async fn seed_marketing_source(&self, tenant_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        tenants::insert_marketing_source(&self.db, tenant_id, id, "Radio spot")
            .await
            .unwrap();
        id
    }

    pub async fn used_count(&self, tenant_id: Uuid) -> i64 {
        tenants::get_tenant(&self.db, tenant_id)
            .await
            .unwrap()
            .unwrap()
            .tracking_numbers_used_count
    }

    /// Provision a number forwarding to `FORWARD_TO`
    pub async fn provision(&self, tenant_id: Uuid, marketing_source_id: Option<Uuid>) -> TrackingNumberView {
        self.state
            .provisioner
            .provision(tenant_id, provision_request(marketing_source_id))
            .await
            .unwrap()
    }
}

pub fn provision_request(marketing_source_id: Option<Uuid>) -> ProvisionRequest {
    ProvisionRequest {
        number: None,
        area_code: Some("312".into()),
        country: "US".into(),
        marketing_source_id,
        forwarding_voice_number: Some(FORWARD_TO.into()),
        recording_enabled: true,
    }
}

pub fn pairs(params: &[(&str, &str)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Webhook delivery signed the way the provider signs it
pub fn signed_webhook(path: &str, params: &[(&str, &str)]) -> WebhookRequest {
    let params = pairs(params);
    let signature = compute_signature(AUTH_TOKEN, &format!("{}{}", BASE_URL, path), &params).unwrap();
    WebhookRequest::new(path, params, Some(signature))
}

/// Form body and signature header value for an HTTP webhook test
pub fn signed_form(path: &str, params: &[(&str, &str)]) -> (String, String) {
    let params = pairs(params);
    let signature = compute_signature(AUTH_TOKEN, &format!("{}{}", BASE_URL, path), &params).unwrap();
    let body = params
        .iter()
        .map(|(k, v)| format!("{}={}", form_escape(k), form_escape(v)))
        .collect::<Vec<_>>()
        .join("&");
    (body, signature)
}

fn form_escape(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}
