//! Deepgram speech-to-text client (pre-recorded audio, diarized utterances)

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ClientError, RawTranscript, SpeechToText, Utterance};

const USER_AGENT: &str = concat!("calltrack/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ListenResponse {
    #[serde(default)]
    metadata: Option<ListenMetadata>,
    #[serde(default)]
    results: Option<ListenResults>,
}

#[derive(Debug, Deserialize)]
struct ListenMetadata {
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    utterances: Vec<ListenUtterance>,
    #[serde(default)]
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenUtterance {
    start: f64,
    end: Option<f64>,
    #[serde(default)]
    transcript: String,
    speaker: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    detected_language: Option<String>,
}

impl From<ListenResponse> for RawTranscript {
    fn from(response: ListenResponse) -> Self {
        let (utterances, language) = match response.results {
            Some(results) => (
                results
                    .utterances
                    .into_iter()
                    .map(|u| Utterance {
                        speaker: u.speaker,
                        start: u.start,
                        end: u.end.unwrap_or(u.start),
                        text: u.transcript,
                    })
                    .collect(),
                results.channels.into_iter().find_map(|c| c.detected_language),
            ),
            None => (Vec::new(), None),
        };

        RawTranscript {
            utterances,
            duration_secs: response.metadata.and_then(|m| m.duration),
            language,
        }
    }
}

pub struct DeepgramClient {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl DeepgramClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ClientError::Fatal(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn listen_request(&self) -> reqwest::RequestBuilder {
        self.http_client
            .post(format!("{}/v1/listen", self.base_url))
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.api_key))
            .query(&[
                ("model", self.model.as_str()),
                ("smart_format", "true"),
                ("diarize", "true"),
                ("punctuate", "true"),
                ("utterances", "true"),
            ])
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<RawTranscript, ClientError> {
        let response = request.send().await.map_err(ClientError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, &body));
        }

        let parsed: ListenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let transcript = RawTranscript::from(parsed);

        tracing::debug!(
            utterances = transcript.utterances.len(),
            duration_secs = ?transcript.duration_secs,
            "Deepgram transcription received"
        );

        Ok(transcript)
    }
}

#[async_trait]
impl SpeechToText for DeepgramClient {
    async fn transcribe_url(&self, url: &str) -> Result<RawTranscript, ClientError> {
        self.execute(self.listen_request().json(&json!({ "url": url }))).await
    }

    async fn transcribe_bytes(&self, audio: Bytes, content_type: &str) -> Result<RawTranscript, ClientError> {
        self.execute(
            self.listen_request()
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(audio),
        )
        .await
    }
}
