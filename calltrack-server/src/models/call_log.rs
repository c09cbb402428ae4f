//! Call log record

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::enums::{CallDepartment, CallDirection, CallIntent, CallResult, CallStatus};
use super::transcript::TranscriptDocument;

/// One provider call, keyed by `provider_call_id`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub tracking_number_id: Uuid,
    pub marketing_source_id: Option<Uuid>,
    pub provider_call_id: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub caller_number: Option<String>,
    pub receiver_number: Option<String>,
    pub call_started_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub recording_url: Option<String>,
    pub recording_object_key: Option<String>,
    pub transcript_text: Option<String>,
    pub transcript: Option<TranscriptDocument>,
    pub result: CallResult,
    pub intent: CallIntent,
    pub department: CallDepartment,
    pub sentiment: Option<u8>,
    pub classified_at: Option<DateTime<Utc>>,
    pub volume_rolled_up_at: Option<DateTime<Utc>>,
    pub kpi_rolled_up_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallLog {
    /// Classification has not been written and a field is still a placeholder
    pub fn needs_classification(&self) -> bool {
        self.classified_at.is_none()
            && (self.intent == CallIntent::None
                || self.result == CallResult::None
                || self.department == CallDepartment::None
                || self.sentiment.is_none())
    }
}

/// Fields captured on the first voice-start event
#[derive(Debug, Clone)]
pub struct NewCallLog {
    pub tenant_id: Uuid,
    pub tracking_number_id: Uuid,
    pub marketing_source_id: Option<Uuid>,
    pub provider_call_id: String,
    pub caller_number: Option<String>,
    pub receiver_number: Option<String>,
    pub call_started_at: DateTime<Utc>,
}
