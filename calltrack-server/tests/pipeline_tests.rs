//! Integration tests for the recording ingest pipeline and its ledger

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use calltrack_common::time::{format_timestamp, now};
use calltrack_server::db::{call_logs, processing};
use calltrack_server::models::{CallDepartment, CallIntent, CallResult};
use calltrack_server::services::pipeline::Stage;
use calltrack_server::services::{PipelineReport, RetrySweeper};
use helpers::{signed_webhook, TestApp};

const RECORDING_URL: &str = "https://api.twilio.com/2010-04-01/Accounts/AC1/Recordings/RE1";

/// Start and complete a call so a CallLog exists
async fn completed_call(app: &TestApp, call_sid: &str) {
    let tenant_id = app.seed_tenant(1).await;
    let number = app.provision(tenant_id, None).await;
    app.state
        .gateway
        .on_voice_start(&signed_webhook(
            "/twilio/voice",
            &[("CallSid", call_sid), ("From", "+17735550100"), ("To", number.number.as_str())],
        ))
        .await
        .unwrap();
    app.state
        .gateway
        .on_status_change(&signed_webhook(
            "/twilio/call-status",
            &[("CallSid", call_sid), ("CallStatus", "completed"), ("CallDuration", "55")],
        ))
        .await
        .unwrap();
}

/// TC-PIPE-001: Second run on a processed call makes no external calls
#[tokio::test]
async fn test_rerun_is_free() {
    let app = TestApp::new().await;
    completed_call(&app, "CA1").await;

    let first = app.state.pipeline.ensure_processed("CA1", RECORDING_URL).await;
    assert_eq!(first, PipelineReport::Completed);
    assert_eq!(app.telephony.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(app.store.puts.load(Ordering::SeqCst), 1);
    assert_eq!(app.stt.calls(), 1);
    let llm_calls = app.llm.calls.load(Ordering::SeqCst);
    assert_eq!(llm_calls, 2);

    let second = app.state.pipeline.ensure_processed("CA1", RECORDING_URL).await;
    assert_eq!(second, PipelineReport::Completed);
    assert_eq!(app.telephony.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(app.store.puts.load(Ordering::SeqCst), 1);
    assert_eq!(app.stt.calls(), 1);
    assert_eq!(app.llm.calls.load(Ordering::SeqCst), llm_calls);

    let record = processing::get(&app.db, "CA1").await.unwrap().unwrap();
    assert_eq!(record.attempts, 2);
    assert!(record.completed_at.is_some());
    assert!(record.next_attempt_at.is_none());
}

/// TC-PIPE-002: Stored object is reused even without a recorded key
#[tokio::test]
async fn test_existing_object_skips_fetch() {
    let app = TestApp::new().await;
    completed_call(&app, "CA2").await;
    app.store.objects.lock().unwrap().insert(
        "calls/CA2.mp3".to_string(),
        calltrack_server::clients::StoredObject {
            bytes: bytes::Bytes::from_static(b"audio"),
            content_type: "audio/mpeg".into(),
        },
    );

    let report = app.state.pipeline.ensure_processed("CA2", RECORDING_URL).await;

    assert_eq!(report, PipelineReport::Completed);
    assert_eq!(app.telephony.fetches.load(Ordering::SeqCst), 0);
    let log = call_logs::find_by_provider_id(&app.db, "CA2").await.unwrap().unwrap();
    assert_eq!(log.recording_object_key.as_deref(), Some("calls/CA2.mp3"));
}

/// TC-PIPE-003: Empty transcript aborts without classification
#[tokio::test]
async fn test_empty_transcript_aborts() {
    let app = TestApp::new().await;
    completed_call(&app, "CA3").await;
    app.stt.utterances.lock().unwrap().clear();

    let report = app.state.pipeline.ensure_processed("CA3", RECORDING_URL).await;

    assert!(
        matches!(report, PipelineReport::Aborted { stage: Stage::Transcription, .. }),
        "got {:?}",
        report
    );
    // Signed URL attempt plus the direct-bytes fallback
    assert_eq!(app.stt.url_calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.stt.byte_calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.llm.calls.load(Ordering::SeqCst), 0);

    let log = call_logs::find_by_provider_id(&app.db, "CA3").await.unwrap().unwrap();
    assert!(log.transcript_text.is_none());
    assert!(log.classified_at.is_none());
    assert!(log.kpi_rolled_up_at.is_none());

    let record = processing::get(&app.db, "CA3").await.unwrap().unwrap();
    assert!(record.next_attempt_at.is_none());
    assert!(record.completed_at.is_none());
    assert_eq!(record.last_stage.as_deref(), Some("transcription"));
    assert!(record.last_error.is_some());
}

/// TC-PIPE-004: Without a language model the keyword heuristics classify
#[tokio::test]
async fn test_heuristic_fallback() {
    let app = TestApp::without_llm().await;
    completed_call(&app, "CA4").await;

    let report = app.state.pipeline.ensure_processed("CA4", RECORDING_URL).await;

    assert_eq!(report, PipelineReport::Completed);
    let log = call_logs::find_by_provider_id(&app.db, "CA4").await.unwrap().unwrap();
    assert_eq!(log.intent, CallIntent::Appointment);
    assert_eq!(log.result, CallResult::AppointmentBooked);
    assert_eq!(log.department, CallDepartment::Sales);
    assert_eq!(log.sentiment, Some(4));
    assert_eq!(app.llm.calls.load(Ordering::SeqCst), 0);

    // Opening line matches the salesperson phrases
    let transcript = log.transcript.unwrap();
    assert!(transcript.roles_assigned);
}

/// TC-PIPE-005: Missing call log is a permanent abort
#[tokio::test]
async fn test_missing_call_log_aborts() {
    let app = TestApp::new().await;

    let report = app.state.pipeline.ensure_processed("CA-missing", RECORDING_URL).await;

    assert!(matches!(report, PipelineReport::Aborted { stage: Stage::Lookup, .. }));
    let record = processing::get(&app.db, "CA-missing").await.unwrap().unwrap();
    assert!(record.next_attempt_at.is_none());
}

/// TC-PIPE-006: Retryable failure is scheduled and the sweep finishes it
#[tokio::test]
async fn test_retryable_failure_then_sweep() {
    // Given: the provider cannot serve the recording yet
    let app = TestApp::new().await;
    completed_call(&app, "CA6").await;
    app.telephony.fail_fetch.store(true, Ordering::SeqCst);

    // When: the pipeline runs
    let report = app.state.pipeline.ensure_processed("CA6", RECORDING_URL).await;

    // Then: media stage failed with a scheduled retry
    match &report {
        PipelineReport::Failed { stage, retry_at, .. } => {
            assert_eq!(*stage, Stage::Media);
            assert!(retry_at.unwrap() > now());
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(app.telephony.fetches.load(Ordering::SeqCst), 2);

    let sweeper = RetrySweeper::new(app.db.clone(), Arc::clone(&app.state.pipeline), Duration::from_secs(60));
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

    // When: the retry comes due and the provider recovers
    sqlx::query("UPDATE call_processing SET next_attempt_at = ? WHERE provider_call_id = ?")
        .bind(format_timestamp(now() - chrono::Duration::seconds(1)))
        .bind("CA6")
        .execute(&app.db)
        .await
        .unwrap();
    app.telephony.fail_fetch.store(false, Ordering::SeqCst);

    // Then: the sweep completes the call
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    let record = processing::get(&app.db, "CA6").await.unwrap().unwrap();
    assert_eq!(record.attempts, 2);
    assert!(record.completed_at.is_some());
    let log = call_logs::find_by_provider_id(&app.db, "CA6").await.unwrap().unwrap();
    assert!(log.classified_at.is_some());
}

/// TC-PIPE-007: Concurrent runs for the same call do the work once
#[tokio::test]
async fn test_concurrent_runs_single_flight() {
    let app = TestApp::new().await;
    completed_call(&app, "CA7").await;

    let pipeline = Arc::clone(&app.state.pipeline);
    let (a, b) = tokio::join!(
        pipeline.ensure_processed("CA7", RECORDING_URL),
        pipeline.ensure_processed("CA7", RECORDING_URL),
    );

    let completed = [&a, &b]
        .iter()
        .filter(|r| ***r == PipelineReport::Completed)
        .count();
    assert!(completed >= 1);
    assert_eq!(app.stt.calls(), 1);
    assert_eq!(app.telephony.fetches.load(Ordering::SeqCst), 1);
}
