//! Provider webhook payloads
//!
//! Parameters arrive form-encoded. The raw pairs are kept for signature
//! verification; typed events are extracted afterwards.

use calltrack_common::{Error, Result};

use super::requests::normalize_e164;

/// Raw signed webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Path plus query exactly as requested, e.g. `/twilio/voice`
    pub path: String,
    pub params: Vec<(String, String)>,
    pub signature: Option<String>,
}

impl WebhookRequest {
    pub fn new(path: impl Into<String>, params: Vec<(String, String)>, signature: Option<String>) -> Self {
        Self {
            path: path.into(),
            params,
            signature,
        }
    }

    /// First value of a parameter, trimmed; empty counts as missing
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.param(name)
            .ok_or_else(|| Error::Validation(format!("Missing webhook parameter {}", name)))
    }
}

/// Inbound call started
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceStartEvent {
    pub call_sid: String,
    /// Dialed tracking number (E.164)
    pub to: String,
    pub from: Option<String>,
}

impl VoiceStartEvent {
    pub fn from_request(request: &WebhookRequest) -> Result<Self> {
        Ok(Self {
            call_sid: request.required("CallSid")?.to_string(),
            to: normalize_e164("To", request.required("To")?)?,
            from: request.param("From").map(str::to_string),
        })
    }
}

/// Call status changed
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangeEvent {
    pub call_sid: String,
    /// Raw provider status; mapped by the gateway
    pub status: String,
    pub duration_seconds: Option<i64>,
}

impl StatusChangeEvent {
    pub fn from_request(request: &WebhookRequest) -> Result<Self> {
        let duration_seconds = match request.param("CallDuration") {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                Error::Validation(format!("CallDuration must be an integer, got '{}'", raw))
            })?),
            None => None,
        };
        Ok(Self {
            call_sid: request.required("CallSid")?.to_string(),
            status: request.param("CallStatus").unwrap_or("").to_string(),
            duration_seconds: duration_seconds.map(|d| d.max(0)),
        })
    }
}

/// Recording status callback
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingReadyEvent {
    pub call_sid: String,
    pub recording_url: Option<String>,
    pub recording_status: String,
}

impl RecordingReadyEvent {
    pub fn from_request(request: &WebhookRequest) -> Result<Self> {
        Ok(Self {
            call_sid: request.required("CallSid")?.to_string(),
            recording_url: request.param("RecordingUrl").map(str::to_string),
            recording_status: request
                .param("RecordingStatus")
                .unwrap_or("")
                .to_ascii_lowercase(),
        })
    }

    pub fn is_completed(&self) -> bool {
        self.recording_status == "completed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(params: &[(&str, &str)]) -> WebhookRequest {
        WebhookRequest::new(
            "/twilio/call-status",
            params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            None,
        )
    }

    #[test]
    fn status_event_parses_duration() {
        let event = StatusChangeEvent::from_request(&request(&[
            ("CallSid", "CA1"),
            ("CallStatus", "completed"),
            ("CallDuration", "42"),
        ]))
        .unwrap();
        assert_eq!(event.duration_seconds, Some(42));
    }

    #[test]
    fn missing_call_sid_is_validation_error() {
        let result = StatusChangeEvent::from_request(&request(&[("CallStatus", "busy")]));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn voice_event_normalizes_number() {
        let event = VoiceStartEvent::from_request(&request(&[
            ("CallSid", "CA1"),
            ("To", "+1 555 010 2030"),
            ("From", "+15550001111"),
        ]))
        .unwrap();
        assert_eq!(event.to, "+15550102030");
    }
}
