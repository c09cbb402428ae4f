//! Twilio REST client and webhook signature verification

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use calltrack_common::retry::{retry_with_backoff, RetryPolicy};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{
    AvailableNumber, AvailableNumberQuery, ClientError, NumberLookup, PurchaseRequest,
    PurchasedNumber, RecordingMedia, ReleaseOutcome, TelephonyProvider,
};

type HmacSha1 = Hmac<Sha1>;

const USER_AGENT: &str = concat!("calltrack/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2010-04-01";
/// Twilio error code for a resource that no longer exists
const TWILIO_NOT_FOUND_CODE: i64 = 20404;
const RECORDING_TIMEOUT: Duration = Duration::from_secs(25);
const LOOKUP_PAGE_SIZE: &str = "5";

/// `X-Twilio-Signature` value for a request
///
/// HMAC-SHA1 keyed by the auth token over the full URL followed by every
/// posted key/value pair, sorted, then base64.
pub fn compute_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
) -> calltrack_common::Result<String> {
    let mac = signature_mac(auth_token, url, params)?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn signature_mac(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
) -> calltrack_common::Result<HmacSha1> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .map_err(|e| calltrack_common::Error::Internal(format!("HMAC key error: {}", e)))?;
    mac.update(url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Ok(mac)
}

/// Verifies webhook signatures against the configured public base URL
#[derive(Clone)]
pub struct WebhookVerifier {
    auth_token: String,
    base_url: String,
}

impl WebhookVerifier {
    pub fn new(auth_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reject missing or mismatching signatures (constant-time compare)
    pub fn verify(
        &self,
        path: &str,
        params: &[(String, String)],
        signature: Option<&str>,
    ) -> calltrack_common::Result<()> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| calltrack_common::Error::Unauthorized("Missing request signature".into()))?;

        let provided = STANDARD
            .decode(signature)
            .map_err(|_| calltrack_common::Error::Unauthorized("Invalid request signature".into()))?;

        let url = format!("{}{}", self.base_url, path);
        signature_mac(&self.auth_token, &url, params)?
            .verify_slice(&provided)
            .map_err(|_| calltrack_common::Error::Unauthorized("Invalid request signature".into()))
    }
}

#[derive(Debug, Deserialize)]
struct AvailableNumbersPage {
    #[serde(default)]
    available_phone_numbers: Vec<TwilioAvailableNumber>,
}

#[derive(Debug, Deserialize)]
struct TwilioAvailableNumber {
    phone_number: String,
    locality: Option<String>,
    region: Option<String>,
    iso_country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncomingNumbersPage {
    #[serde(default)]
    incoming_phone_numbers: Vec<IncomingNumber>,
}

#[derive(Debug, Deserialize)]
struct IncomingNumber {
    sid: String,
    phone_number: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
}

/// Twilio REST API client
pub struct TwilioClient {
    http_client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    api_base: String,
    shutdown: CancellationToken,
}

impl TwilioClient {
    pub fn new(
        account_sid: String,
        auth_token: String,
        api_base: String,
        shutdown: CancellationToken,
    ) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClientError::Fatal(e.to_string()))?;

        Ok(Self {
            http_client,
            account_sid,
            auth_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            shutdown,
        })
    }

    fn account_url(&self, path: &str) -> String {
        format!(
            "{}/{}/Accounts/{}{}",
            self.api_base, API_VERSION, self.account_sid, path
        )
    }

    /// Send and map non-success statuses; Twilio code 20404 means gone
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<TwilioErrorBody>(&body)
            .ok()
            .and_then(|b| b.code);
        if code == Some(TWILIO_NOT_FOUND_CODE) {
            return Err(ClientError::NotFound(format!("Twilio {}: {}", TWILIO_NOT_FOUND_CODE, body)));
        }
        Err(ClientError::from_status(status, &body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let response = self.send(self.http_client.get(url).query(query)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn search(&self, query: &AvailableNumberQuery) -> Result<Vec<AvailableNumber>, ClientError> {
        let url = self.account_url(&format!("/AvailablePhoneNumbers/{}/Local.json", query.country));
        let mut params = vec![
            ("VoiceEnabled", "true".to_string()),
            ("PageSize", query.limit.to_string()),
        ];
        if let Some(area_code) = &query.area_code {
            params.push(("AreaCode", area_code.clone()));
        }
        if let Some(region) = &query.region {
            params.push(("InRegion", region.clone()));
        }

        tracing::debug!(country = %query.country, area_code = ?query.area_code, "Searching available numbers");

        let page: AvailableNumbersPage = self.get_json(&url, &params).await?;
        Ok(page
            .available_phone_numbers
            .into_iter()
            .map(|n| AvailableNumber {
                phone_number: n.phone_number,
                locality: n.locality,
                region: n.region,
                country: n.iso_country,
            })
            .collect())
    }
}

#[async_trait]
impl TelephonyProvider for TwilioClient {
    async fn list_available_numbers(
        &self,
        query: &AvailableNumberQuery,
    ) -> Result<Vec<AvailableNumber>, ClientError> {
        self.search(query).await
    }

    async fn purchase_number(&self, request: &PurchaseRequest) -> Result<PurchasedNumber, ClientError> {
        let (phone_number, region, country) = match &request.number {
            Some(number) => (number.clone(), None, Some(request.country.clone())),
            None => {
                let query = AvailableNumberQuery {
                    country: request.country.clone(),
                    area_code: request.area_code.clone(),
                    region: None,
                    limit: 1,
                };
                let candidate = self.search(&query).await?.into_iter().next().ok_or_else(|| {
                    ClientError::Fatal(format!(
                        "No available numbers for area code {}",
                        request.area_code.as_deref().unwrap_or("any")
                    ))
                })?;
                (candidate.phone_number, candidate.region, candidate.country)
            }
        };

        let params = [
            ("PhoneNumber", phone_number.as_str()),
            ("VoiceUrl", request.voice_url.as_str()),
            ("VoiceMethod", "POST"),
            ("StatusCallback", request.status_callback_url.as_str()),
            ("StatusCallbackMethod", "POST"),
        ];

        let response = self
            .send(
                self.http_client
                    .post(self.account_url("/IncomingPhoneNumbers.json"))
                    .form(&params),
            )
            .await?;
        let created: IncomingNumber = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        tracing::info!(
            provider_number_id = %created.sid,
            phone_number = %created.phone_number,
            "Purchased phone number"
        );

        Ok(PurchasedNumber {
            provider_number_id: created.sid,
            phone_number: created.phone_number,
            country,
            region,
        })
    }

    async fn find_number_id(&self, phone_number: &str) -> Result<NumberLookup, ClientError> {
        let page: IncomingNumbersPage = self
            .get_json(
                &self.account_url("/IncomingPhoneNumbers.json"),
                &[
                    ("PhoneNumber", phone_number.to_string()),
                    ("PageSize", LOOKUP_PAGE_SIZE.to_string()),
                ],
            )
            .await?;

        let mut matches: Vec<IncomingNumber> = page
            .incoming_phone_numbers
            .into_iter()
            .filter(|n| n.phone_number == phone_number)
            .collect();

        Ok(match matches.len() {
            0 => NumberLookup::Missing,
            1 => NumberLookup::Found(matches.remove(0).sid),
            n => {
                tracing::warn!(phone_number, matches = n, "Multiple provider numbers match");
                NumberLookup::Ambiguous(n)
            }
        })
    }

    async fn release_number(&self, provider_number_id: &str) -> Result<ReleaseOutcome, ClientError> {
        let url = self.account_url(&format!("/IncomingPhoneNumbers/{}.json", provider_number_id));

        let result = retry_with_backoff(
            "twilio release",
            &RetryPolicy::with_attempts(2),
            &self.shutdown,
            ClientError::is_retryable,
            |_| self.send(self.http_client.delete(&url)),
        )
        .await;

        match result {
            Ok(_) => Ok(ReleaseOutcome::Released),
            Err(ClientError::NotFound(_)) => {
                tracing::info!(provider_number_id, "Number already released at provider");
                Ok(ReleaseOutcome::AlreadyGone)
            }
            Err(err) => Err(err),
        }
    }

    async fn fetch_recording(&self, media_url: &str) -> Result<RecordingMedia, ClientError> {
        let response = self
            .send(self.http_client.get(media_url).timeout(RECORDING_TIMEOUT))
            .await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from_reqwest))
            .boxed();

        Ok(RecordingMedia { content_type, stream })
    }
}
