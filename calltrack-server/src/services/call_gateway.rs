//! Provider webhook state machine
//!
//! Every handler verifies the request signature before reading anything
//! else. Call logs are keyed by the provider call id, and status writes only
//! move a call out of a non-terminal state, so redelivered or reordered
//! events converge.

use std::sync::Arc;

use calltrack_common::time::now;
use calltrack_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::clients::WebhookVerifier;
use crate::db::{call_logs, routes, tracking_numbers};
use crate::models::{
    CallResult, CallStatus, NewCallLog, RecordingReadyEvent, StatusChangeEvent, VoiceStartEvent,
    WebhookRequest,
};
use crate::services::pipeline::RecordingIngestPipeline;
use crate::services::rollup::HourlyRollupAggregator;

/// Routing decision for an inbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceInstructions {
    Forward {
        /// Tracking number presented to the forwarded party
        caller_id: String,
        forward_to: String,
        record: bool,
        recording_callback: String,
    },
    Decline,
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

impl VoiceInstructions {
    /// Render as TwiML
    pub fn to_twiml(&self) -> String {
        match self {
            VoiceInstructions::Decline => {
                r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>Number not recognized.</Say><Hangup/></Response>"#
                    .to_string()
            }
            VoiceInstructions::Forward {
                caller_id,
                forward_to,
                record,
                recording_callback,
            } => {
                let recording = if *record {
                    format!(
                        r#" record="record-from-answer-dual" recordingStatusCallback="{}" recordingStatusCallbackEvent="completed""#,
                        escape_xml(recording_callback)
                    )
                } else {
                    String::new()
                };
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8"?><Response><Dial callerId="{}"{}><Number>{}</Number></Dial></Response>"#,
                    escape_xml(caller_id),
                    recording,
                    escape_xml(forward_to)
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutcome {
    pub status: CallStatus,
    /// False for unknown calls
    pub known_call: bool,
    /// Whether this event changed the stored status
    pub applied: bool,
    pub volume_counted: bool,
    pub kpis_counted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum RecordingOutcome {
    #[serde(rename_all = "camelCase")]
    Ignored { recording_status: String },
    UnknownCall,
    Dispatched,
}

pub struct CallLifecycleGateway {
    db: SqlitePool,
    verifier: WebhookVerifier,
    rollups: HourlyRollupAggregator,
    pipeline: Arc<RecordingIngestPipeline>,
}

impl CallLifecycleGateway {
    pub fn new(
        db: SqlitePool,
        verifier: WebhookVerifier,
        rollups: HourlyRollupAggregator,
        pipeline: Arc<RecordingIngestPipeline>,
    ) -> Self {
        Self {
            db,
            verifier,
            rollups,
            pipeline,
        }
    }

    fn verify(&self, request: &WebhookRequest) -> Result<()> {
        self.verifier
            .verify(&request.path, &request.params, request.signature.as_deref())
            .map_err(|e| {
                warn!(path = %request.path, "Rejected webhook: {}", e);
                e
            })
    }

    /// Inbound call: record it and decide where to forward
    pub async fn on_voice_start(&self, request: &WebhookRequest) -> Result<VoiceInstructions> {
        self.verify(request)?;
        let event = VoiceStartEvent::from_request(request)?;

        let Some(number) = tracking_numbers::find_active_by_number(&self.db, &event.to).await? else {
            info!(call_sid = %event.call_sid, to = %event.to, "No active tracking number for dialed number");
            return Ok(VoiceInstructions::Decline);
        };

        let route = routes::find_active(&self.db, number.id).await?;
        let Some((route, forward_to)) =
            route.and_then(|r| r.forwarding_voice_number.clone().map(|f| (r, f)))
        else {
            info!(call_sid = %event.call_sid, tracking_number_id = %number.id, "Tracking number has no active route");
            return Ok(VoiceInstructions::Decline);
        };

        let created = call_logs::insert_if_absent(
            &self.db,
            &NewCallLog {
                tenant_id: number.tenant_id,
                tracking_number_id: number.id,
                marketing_source_id: number.marketing_source_id,
                provider_call_id: event.call_sid.clone(),
                caller_number: event.from.clone(),
                receiver_number: Some(event.to.clone()),
                call_started_at: now(),
            },
        )
        .await?;

        if created {
            info!(call_sid = %event.call_sid, tenant_id = %number.tenant_id, "Inbound call started");
        } else {
            debug!(call_sid = %event.call_sid, "Duplicate voice-start delivery");
        }

        Ok(VoiceInstructions::Forward {
            caller_id: number.number,
            forward_to,
            record: route.recording_enabled,
            recording_callback: format!("{}/twilio/recording", self.verifier.base_url()),
        })
    }

    /// Call status changed at the provider
    pub async fn on_status_change(&self, request: &WebhookRequest) -> Result<StatusOutcome> {
        self.verify(request)?;
        let event = StatusChangeEvent::from_request(request)?;
        let status = CallStatus::from_provider(&event.status);

        let (duration, result) = if status.is_not_connected() {
            (Some(event.duration_seconds.unwrap_or(0)), Some(CallResult::NotConnected))
        } else if status == CallStatus::Completed {
            (event.duration_seconds, None)
        } else {
            (None, None)
        };

        let applied = call_logs::apply_status(&self.db, &event.call_sid, status, duration, result).await?;

        let Some(log) = call_logs::find_by_provider_id(&self.db, &event.call_sid).await? else {
            warn!(call_sid = %event.call_sid, status = %status, "Status event for unknown call");
            return Ok(StatusOutcome {
                status,
                known_call: false,
                applied: false,
                volume_counted: false,
                kpis_counted: false,
            });
        };

        if applied {
            info!(call_sid = %event.call_sid, status = %status, "Call status updated");
        } else {
            debug!(
                call_sid = %event.call_sid,
                status = %status,
                stored = %log.status,
                "Status event ignored, not a forward move"
            );
        }

        // Rollups are keyed on the stored state, so a redelivery retries a
        // rollup that failed earlier without counting twice
        let volume_counted = if log.status.is_terminal() {
            self.rollups.apply_volume(&log).await?
        } else {
            false
        };
        // A completed call classified before its status arrived is counted here
        let kpis_counted = if log.status.is_not_connected()
            || (log.status == CallStatus::Completed && log.classified_at.is_some())
        {
            self.rollups.apply_department_kpis(&log).await?
        } else {
            false
        };

        Ok(StatusOutcome {
            status: log.status,
            known_call: true,
            applied,
            volume_counted,
            kpis_counted,
        })
    }

    /// Recording finished: remember it and hand the call to the pipeline
    pub async fn on_recording_ready(&self, request: &WebhookRequest) -> Result<RecordingOutcome> {
        self.verify(request)?;
        let event = RecordingReadyEvent::from_request(request)?;

        if !event.is_completed() {
            debug!(call_sid = %event.call_sid, status = %event.recording_status, "Recording not finished");
            return Ok(RecordingOutcome::Ignored {
                recording_status: event.recording_status,
            });
        }
        let Some(recording_url) = event.recording_url else {
            warn!(call_sid = %event.call_sid, "Completed recording without a URL");
            return Ok(RecordingOutcome::Ignored {
                recording_status: event.recording_status,
            });
        };

        if !call_logs::set_recording_url(&self.db, &event.call_sid, &recording_url).await? {
            warn!(call_sid = %event.call_sid, "Recording for unknown call");
            return Ok(RecordingOutcome::UnknownCall);
        }

        info!(call_sid = %event.call_sid, "Recording ready, starting pipeline");
        self.pipeline.dispatch(event.call_sid, recording_url).await;
        Ok(RecordingOutcome::Dispatched)
    }
}
