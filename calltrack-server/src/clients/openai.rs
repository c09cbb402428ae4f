//! OpenAI Responses API client with strict JSON-schema output

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ClientError, LanguageModel, StructuredRequest};

const USER_AGENT: &str = concat!("calltrack/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    status: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

impl ResponsesBody {
    /// Parsed JSON from the first `output_text` part
    fn structured_output(&self) -> Result<Option<Value>, ClientError> {
        if self.status.as_deref() == Some("incomplete") {
            return Err(ClientError::Decode("Incomplete response".into()));
        }

        let text = self
            .output
            .iter()
            .flat_map(|item| item.content.iter())
            .find(|part| part.kind == "output_text")
            .and_then(|part| part.text.as_deref());

        match text {
            Some(text) => serde_json::from_str(text)
                .map(Some)
                .map_err(|e| ClientError::Decode(format!("Model output is not JSON: {}", e))),
            None => Ok(None),
        }
    }
}

pub struct OpenAiClient {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ClientError::Fatal(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn structured(&self, request: &StructuredRequest) -> Result<Option<Value>, ClientError> {
        let body = json!({
            "model": self.model,
            "instructions": request.instructions,
            "input": request.input,
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": true,
                }
            }
        });

        tracing::debug!(schema = %request.schema_name, model = %self.model, "Requesting structured output");

        let response = self
            .http_client
            .post(format!("{}/v1/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, &text));
        }

        let parsed: ResponsesBody = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        parsed.structured_output()
    }
}
