//! Integration tests for the webhook state machine and its rollup effects

mod helpers;

use std::sync::atomic::Ordering;

use calltrack_common::time::hour_floor;
use calltrack_common::Error;
use calltrack_server::db::{call_logs, rollups};
use calltrack_server::models::{
    CallDepartment, CallIntent, CallResult, CallStatus, SpeakerRole, WebhookRequest,
};
use calltrack_server::services::{RecordingOutcome, VoiceInstructions};
use chrono::Duration;
use helpers::{signed_webhook, TestApp, BASE_URL, FORWARD_TO};
use uuid::Uuid;

const CALLER: &str = "+17735550100";
const RECORDING_URL: &str = "https://api.twilio.com/2010-04-01/Accounts/AC1/Recordings/RE100";

async fn start_call(app: &TestApp, call_sid: &str, to: &str) -> VoiceInstructions {
    let request = signed_webhook(
        "/twilio/voice",
        &[("CallSid", call_sid), ("From", CALLER), ("To", to)],
    );
    app.state.gateway.on_voice_start(&request).await.unwrap()
}

fn status(call_sid: &str, status: &str, duration: &str) -> WebhookRequest {
    signed_webhook(
        "/twilio/call-status",
        &[("CallSid", call_sid), ("CallStatus", status), ("CallDuration", duration)],
    )
}

fn recording(call_sid: &str) -> WebhookRequest {
    signed_webhook(
        "/twilio/recording",
        &[
            ("CallSid", call_sid),
            ("RecordingStatus", "completed"),
            ("RecordingUrl", RECORDING_URL),
        ],
    )
}

/// TC-CALL-001: Full call scenario from ring to classified KPIs
#[tokio::test]
async fn test_call_scenario() {
    // Given: active tracking number with a forwarding route and a source
    let app = TestApp::new().await;
    let tenant_id = app.seed_tenant(1).await;
    let source_id = app.seed_marketing_source(tenant_id).await;
    let number = app.provision(tenant_id, Some(source_id)).await;

    // When: the call arrives
    let instructions = start_call(&app, "CA100", &number.number).await;

    // Then: forwarded with recording, call log in progress
    match instructions {
        VoiceInstructions::Forward {
            caller_id,
            forward_to,
            record,
            recording_callback,
        } => {
            assert_eq!(caller_id, number.number);
            assert_eq!(forward_to, FORWARD_TO);
            assert!(record);
            assert_eq!(recording_callback, format!("{}/twilio/recording", BASE_URL));
        }
        VoiceInstructions::Decline => panic!("call should be forwarded"),
    }
    let log = call_logs::find_by_provider_id(&app.db, "CA100").await.unwrap().unwrap();
    assert_eq!(log.status, CallStatus::InProgress);
    assert_eq!(log.marketing_source_id, Some(source_id));
    let bucket = hour_floor(log.call_started_at);

    // When: the call completes after 42 seconds
    let outcome = app
        .state
        .gateway
        .on_status_change(&status("CA100", "completed", "42"))
        .await
        .unwrap();
    assert!(outcome.applied);
    assert!(outcome.volume_counted);
    assert!(!outcome.kpis_counted);

    // Then: the volume bucket for that hour moved
    let volume = rollups::volume_buckets(&app.db, tenant_id, bucket, bucket + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(volume.len(), 1);
    assert_eq!(volume[0].total_calls, 1);
    assert_eq!(volume[0].total_seconds, 42);

    // When: the recording is ready (pipeline runs inline)
    let outcome = app.state.gateway.on_recording_ready(&recording("CA100")).await.unwrap();
    assert!(matches!(outcome, RecordingOutcome::Dispatched));

    // Then: transcript with roles and the model's classification are stored
    let log = call_logs::find_by_provider_id(&app.db, "CA100").await.unwrap().unwrap();
    assert_eq!(log.status, CallStatus::Completed);
    assert_eq!(log.duration_seconds, 42);
    assert_eq!(log.recording_object_key.as_deref(), Some("calls/CA100.mp3"));
    let transcript = log.transcript.as_ref().unwrap();
    assert!(!transcript.turns.is_empty());
    assert!(transcript.roles_assigned);
    assert_eq!(transcript.turns[0].role, SpeakerRole::Salesperson);
    assert_eq!(log.intent, CallIntent::Appointment);
    assert_eq!(log.result, CallResult::AppointmentBooked);
    assert_eq!(log.department, CallDepartment::Sales);
    assert_eq!(log.sentiment, Some(4));
    assert!(log.classified_at.is_some());

    // And: the department KPI bucket counts the booking
    let kpis = rollups::department_bucket(&app.db, tenant_id, Some(source_id), CallDepartment::Sales, bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kpis.total_calls, 1);
    assert_eq!(kpis.connected_calls, 1);
    assert_eq!(kpis.booked_appointments, 1);
    assert_eq!(kpis.requested_appointments, 0);
    assert_eq!(kpis.sentiment_sum, 4);
    assert_eq!(kpis.sentiment_count, 1);
    assert_eq!(kpis.total_seconds, 42);
}

/// TC-CALL-002: Redelivered webhooks never double count
#[tokio::test]
async fn test_duplicate_deliveries_count_once() {
    let app = TestApp::new().await;
    let tenant_id = app.seed_tenant(1).await;
    let number = app.provision(tenant_id, None).await;

    start_call(&app, "CA200", &number.number).await;
    start_call(&app, "CA200", &number.number).await;

    for _ in 0..2 {
        app.state
            .gateway
            .on_status_change(&status("CA200", "completed", "30"))
            .await
            .unwrap();
    }
    let log = call_logs::find_by_provider_id(&app.db, "CA200").await.unwrap().unwrap();
    let bucket = hour_floor(log.call_started_at);
    let volume = rollups::volume_buckets(&app.db, tenant_id, bucket, bucket + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(volume[0].total_calls, 1);
    assert_eq!(volume[0].total_seconds, 30);

    app.state.gateway.on_recording_ready(&recording("CA200")).await.unwrap();
    let stt_calls = app.stt.calls();
    let llm_calls = app.llm.calls.load(Ordering::SeqCst);
    let fetches = app.telephony.fetches.load(Ordering::SeqCst);

    app.state.gateway.on_recording_ready(&recording("CA200")).await.unwrap();

    // No external work on the second run
    assert_eq!(app.stt.calls(), stt_calls);
    assert_eq!(app.llm.calls.load(Ordering::SeqCst), llm_calls);
    assert_eq!(app.telephony.fetches.load(Ordering::SeqCst), fetches);

    let kpis = rollups::department_bucket(&app.db, tenant_id, None, CallDepartment::Sales, bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kpis.total_calls, 1);
    assert_eq!(kpis.sentiment_count, 1);
}

/// TC-CALL-003: Bad signature is rejected before any state change
#[tokio::test]
async fn test_bad_signature_creates_nothing() {
    let app = TestApp::new().await;
    let tenant_id = app.seed_tenant(1).await;
    let number = app.provision(tenant_id, None).await;

    // Tampered parameter after signing
    let mut request = signed_webhook(
        "/twilio/voice",
        &[("CallSid", "CA300"), ("From", CALLER), ("To", number.number.as_str())],
    );
    request.params[1].1 = "+17735550999".to_string();
    let err = app.state.gateway.on_voice_start(&request).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));

    // Signed for a different base URL
    let mut request = signed_webhook(
        "/twilio/voice",
        &[("CallSid", "CA300"), ("From", CALLER), ("To", number.number.as_str())],
    );
    request.path = "/other/voice".to_string();
    assert!(app.state.gateway.on_voice_start(&request).await.is_err());

    // Missing signature
    let mut request = signed_webhook("/twilio/voice", &[("CallSid", "CA300"), ("To", number.number.as_str())]);
    request.signature = None;
    assert!(matches!(
        app.state.gateway.on_voice_start(&request).await,
        Err(Error::Unauthorized(_))
    ));

    assert!(call_logs::find_by_provider_id(&app.db, "CA300").await.unwrap().is_none());
}

/// TC-CALL-004: Unknown dialed number is declined without a call log
#[tokio::test]
async fn test_unknown_number_declined() {
    let app = TestApp::new().await;
    let instructions = start_call(&app, "CA400", "+13125559999").await;
    assert_eq!(instructions, VoiceInstructions::Decline);
    assert!(call_logs::find_by_provider_id(&app.db, "CA400").await.unwrap().is_none());
}

/// TC-CALL-005: Number whose route was retired is declined
#[tokio::test]
async fn test_retired_route_declined() {
    let app = TestApp::new().await;
    let tenant_id = app.seed_tenant(1).await;
    let number = app.provision(tenant_id, None).await;
    app.state
        .provisioner
        .update(
            tenant_id,
            number.id,
            calltrack_server::models::TrackingNumberPatch {
                forwarding_voice_number: calltrack_server::models::Patch::Null,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let instructions = start_call(&app, "CA500", &number.number).await;
    assert_eq!(instructions, VoiceInstructions::Decline);
}

/// TC-CALL-006: Negative outcome counts volume and KPIs at once
#[tokio::test]
async fn test_no_answer_counts_immediately() {
    let app = TestApp::new().await;
    let tenant_id = app.seed_tenant(1).await;
    let number = app.provision(tenant_id, None).await;
    start_call(&app, "CA600", &number.number).await;

    let outcome = app
        .state
        .gateway
        .on_status_change(&signed_webhook(
            "/twilio/call-status",
            &[("CallSid", "CA600"), ("CallStatus", "no-answer")],
        ))
        .await
        .unwrap();
    assert_eq!(outcome.status, CallStatus::NoAnswer);
    assert!(outcome.volume_counted);
    assert!(outcome.kpis_counted);

    let log = call_logs::find_by_provider_id(&app.db, "CA600").await.unwrap().unwrap();
    assert_eq!(log.result, CallResult::NotConnected);
    assert_eq!(log.duration_seconds, 0);

    let kpis = rollups::department_bucket(
        &app.db,
        tenant_id,
        None,
        CallDepartment::None,
        hour_floor(log.call_started_at),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(kpis.total_calls, 1);
    assert_eq!(kpis.connected_calls, 0);
}

/// TC-CALL-007: Late non-terminal status does not reopen a finished call
#[tokio::test]
async fn test_stale_status_ignored() {
    let app = TestApp::new().await;
    let tenant_id = app.seed_tenant(1).await;
    let number = app.provision(tenant_id, None).await;
    start_call(&app, "CA700", &number.number).await;

    app.state
        .gateway
        .on_status_change(&status("CA700", "completed", "12"))
        .await
        .unwrap();
    let outcome = app
        .state
        .gateway
        .on_status_change(&status("CA700", "ringing", "0"))
        .await
        .unwrap();

    assert!(!outcome.applied);
    assert_eq!(outcome.status, CallStatus::Completed);
}

/// TC-CALL-008: Events for unknown calls are acknowledged
#[tokio::test]
async fn test_unknown_call_acknowledged() {
    let app = TestApp::new().await;
    let sid = format!("CA{}", Uuid::new_v4().simple());

    let outcome = app
        .state
        .gateway
        .on_status_change(&status(&sid, "completed", "10"))
        .await
        .unwrap();
    assert!(!outcome.known_call);

    let outcome = app.state.gateway.on_recording_ready(&recording(&sid)).await.unwrap();
    assert!(matches!(outcome, RecordingOutcome::UnknownCall));
}

/// TC-CALL-009: Non-completed recording statuses are ignored
#[tokio::test]
async fn test_recording_in_progress_ignored() {
    let app = TestApp::new().await;
    let request = signed_webhook(
        "/twilio/recording",
        &[("CallSid", "CA900"), ("RecordingStatus", "in-progress")],
    );
    let outcome = app.state.gateway.on_recording_ready(&request).await.unwrap();
    assert!(matches!(outcome, RecordingOutcome::Ignored { .. }));
    assert_eq!(app.stt.calls(), 0);
}

/// TC-CALL-010: Recording that beats the completed status still counts the duration
#[tokio::test]
async fn test_recording_before_completed_counts_duration() {
    // Given: a call in progress
    let app = TestApp::new().await;
    let tenant_id = app.seed_tenant(1).await;
    let source_id = app.seed_marketing_source(tenant_id).await;
    let number = app.provision(tenant_id, Some(source_id)).await;
    start_call(&app, "CA1000", &number.number).await;

    // When: the recording is processed before the call's status is final
    let outcome = app.state.gateway.on_recording_ready(&recording("CA1000")).await.unwrap();
    assert!(matches!(outcome, RecordingOutcome::Dispatched));

    // Then: classified, but KPIs wait for the terminal status
    let log = call_logs::find_by_provider_id(&app.db, "CA1000").await.unwrap().unwrap();
    assert_eq!(log.status, CallStatus::InProgress);
    assert!(log.classified_at.is_some());
    assert!(log.kpi_rolled_up_at.is_none());
    let bucket = hour_floor(log.call_started_at);

    // When: the completed status arrives with the duration
    let outcome = app
        .state
        .gateway
        .on_status_change(&status("CA1000", "completed", "42"))
        .await
        .unwrap();
    assert!(outcome.volume_counted);
    assert!(outcome.kpis_counted);

    // Then: the KPI bucket carries the full duration
    let kpis = rollups::department_bucket(&app.db, tenant_id, Some(source_id), CallDepartment::Sales, bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kpis.total_calls, 1);
    assert_eq!(kpis.total_seconds, 42);
    assert_eq!(kpis.booked_appointments, 1);

    // And: a redelivered completed event counts nothing more
    let outcome = app
        .state
        .gateway
        .on_status_change(&status("CA1000", "completed", "42"))
        .await
        .unwrap();
    assert!(!outcome.kpis_counted);
    let kpis = rollups::department_bucket(&app.db, tenant_id, Some(source_id), CallDepartment::Sales, bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kpis.total_calls, 1);
}

/// TC-CALL-011: Late earlier-stage statuses never move a live call backwards
#[tokio::test]
async fn test_status_never_moves_backwards() {
    let app = TestApp::new().await;
    let tenant_id = app.seed_tenant(1).await;
    let number = app.provision(tenant_id, None).await;
    start_call(&app, "CA1100", &number.number).await;

    for late in ["ringing", "queued", "answered-by-fax"] {
        let outcome = app
            .state
            .gateway
            .on_status_change(&status("CA1100", late, "0"))
            .await
            .unwrap();
        assert!(!outcome.applied, "{} should not apply", late);
        assert_eq!(outcome.status, CallStatus::InProgress);
    }

    let log = call_logs::find_by_provider_id(&app.db, "CA1100").await.unwrap().unwrap();
    assert_eq!(log.status, CallStatus::InProgress);

    // A terminal status still moves it forward
    let outcome = app
        .state
        .gateway
        .on_status_change(&status("CA1100", "completed", "9"))
        .await
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.status, CallStatus::Completed);
}
