//! Recording ingest pipeline
//!
//! media copy -> transcription -> role assignment -> classification, keyed
//! by the provider call id. Every stage first checks whether its output is
//! already persisted, so re-running a call converges on the same state and
//! a fully processed call makes no external requests.
//!
//! Each run is recorded in the `call_processing` ledger; retryable failures
//! get a `next_attempt_at` that the retry sweeper picks up.

pub mod classification;
pub mod heuristics;
pub mod media;
pub mod roles;
pub mod sample;
pub mod transcription;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calltrack_common::config::TomlConfig;
use calltrack_common::retry::RetryPolicy;
use calltrack_common::time::now;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{LanguageModel, ObjectStore, SpeechToText, TelephonyProvider};
use crate::db::{call_logs, processing};
use crate::models::{CallLog, TranscriptDocument};
use crate::services::rollup::HourlyRollupAggregator;

pub use heuristics::Classification;

/// Pipeline step, as recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lookup,
    Media,
    Transcription,
    Classification,
    Rollup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lookup => "lookup",
            Stage::Media => "media",
            Stage::Transcription => "transcription",
            Stage::Classification => "classification",
            Stage::Rollup => "rollup",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
enum StageError {
    /// Later invocations may succeed
    #[error("{stage} failed: {message}")]
    Retryable { stage: Stage, message: String },

    /// Nothing a retry would change
    #[error("{stage} aborted: {message}")]
    Aborted { stage: Stage, message: String },
}

impl StageError {
    fn retryable(stage: Stage, err: impl std::fmt::Display) -> Self {
        StageError::Retryable {
            stage,
            message: err.to_string(),
        }
    }
}

/// Outcome of one pipeline invocation
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineReport {
    Completed,
    /// Nothing to do: no recording reference, or a run is already in flight
    Skipped(&'static str),
    /// Permanent stop, e.g. an empty transcript
    Aborted { stage: Stage, reason: String },
    /// Stage failed; `retry_at` is `None` once attempts are exhausted
    Failed {
        stage: Stage,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    },
}

/// Tunables for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub media_fetch_attempts: u32,
    pub max_attempts: u32,
    pub read_url_ttl: Duration,
    pub retry_base_delay: Duration,
    pub inline: bool,
    pub dealership_names: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            media_fetch_attempts: 3,
            max_attempts: 5,
            read_url_ttl: Duration::from_secs(30 * 60),
            retry_base_delay: Duration::from_secs(60),
            inline: false,
            dealership_names: Vec::new(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            media_fetch_attempts: config.pipeline.media_fetch_attempts,
            max_attempts: config.pipeline.max_attempts,
            read_url_ttl: Duration::from_secs(config.storage.read_url_ttl_secs),
            inline: config.pipeline.inline,
            dealership_names: config.pipeline.dealership_names.clone(),
            ..Self::default()
        }
    }

    /// Ledger backoff: base delay doubling per attempt, +/-30%
    fn ledger_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.max_attempts,
            min_delay: self.retry_base_delay,
            max_delay: self.retry_base_delay * 64,
            ..RetryPolicy::default()
        }
    }
}

/// Removes the call id from the in-flight set when the run ends
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    call_sid: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, call_sid: &str) -> Option<Self> {
        let mut active = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(call_sid.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            call_sid: call_sid.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut active = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.call_sid);
    }
}

pub struct RecordingIngestPipeline {
    db: SqlitePool,
    telephony: Arc<dyn TelephonyProvider>,
    store: Arc<dyn ObjectStore>,
    stt: Arc<dyn SpeechToText>,
    llm: Option<Arc<dyn LanguageModel>>,
    rollups: HourlyRollupAggregator,
    settings: PipelineSettings,
    in_flight: Arc<Mutex<HashSet<String>>>,
    shutdown: CancellationToken,
}

impl RecordingIngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        telephony: Arc<dyn TelephonyProvider>,
        store: Arc<dyn ObjectStore>,
        stt: Arc<dyn SpeechToText>,
        llm: Option<Arc<dyn LanguageModel>>,
        rollups: HourlyRollupAggregator,
        settings: PipelineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            telephony,
            store,
            stt,
            llm,
            rollups,
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the pipeline in the background, or inline when configured
    pub async fn dispatch(self: &Arc<Self>, call_sid: String, recording_url: String) {
        if self.settings.inline {
            self.ensure_processed(&call_sid, &recording_url).await;
            return;
        }

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.ensure_processed(&call_sid, &recording_url).await;
        });
    }

    /// Bring the call to its fully processed state
    ///
    /// Never returns an error; failures are logged and recorded in the ledger.
    pub async fn ensure_processed(&self, call_sid: &str, recording_url: &str) -> PipelineReport {
        if recording_url.trim().is_empty() {
            return PipelineReport::Skipped("no recording reference");
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, call_sid) else {
            debug!(call_sid, "Pipeline already running for call");
            return PipelineReport::Skipped("already running");
        };

        let attempts = match processing::record_attempt(&self.db, call_sid, recording_url).await {
            Ok(attempts) => attempts,
            Err(e) => {
                warn!(call_sid, error = %e, "Failed to record pipeline attempt");
                1
            }
        };

        debug!(call_sid, attempt = attempts, "Pipeline started");

        match self.run(call_sid, recording_url).await {
            Ok(()) => {
                if let Err(e) = processing::mark_completed(&self.db, call_sid).await {
                    warn!(call_sid, error = %e, "Failed to mark pipeline completed");
                }
                info!(call_sid, "Pipeline completed");
                PipelineReport::Completed
            }
            Err(StageError::Aborted { stage, message }) => {
                error!(call_sid, stage = %stage, reason = %message, "Pipeline aborted");
                self.record_failure(call_sid, stage, &message, None).await;
                PipelineReport::Aborted {
                    stage,
                    reason: message,
                }
            }
            Err(StageError::Retryable { stage, message }) => {
                let retry_at = (attempts < self.settings.max_attempts).then(|| {
                    let delay = self
                        .settings
                        .ledger_retry_policy()
                        .delay_for(attempts.saturating_sub(1));
                    now() + chrono::Duration::milliseconds(delay.as_millis() as i64)
                });
                error!(
                    call_sid,
                    stage = %stage,
                    attempt = attempts,
                    error = %message,
                    retry_at = ?retry_at,
                    "Pipeline stage failed"
                );
                self.record_failure(call_sid, stage, &message, retry_at).await;
                PipelineReport::Failed {
                    stage,
                    error: message,
                    retry_at,
                }
            }
        }
    }

    async fn record_failure(
        &self,
        call_sid: &str,
        stage: Stage,
        message: &str,
        retry_at: Option<DateTime<Utc>>,
    ) {
        if let Err(e) =
            processing::record_failure(&self.db, call_sid, stage.as_str(), message, retry_at).await
        {
            warn!(call_sid, error = %e, "Failed to record pipeline failure");
        }
    }

    async fn mark_stage(&self, call_sid: &str, stage: Stage) {
        if let Err(e) = processing::record_stage(&self.db, call_sid, stage.as_str()).await {
            warn!(call_sid, error = %e, "Failed to record pipeline stage");
        }
    }

    async fn load(&self, call_sid: &str) -> Result<CallLog, StageError> {
        call_logs::find_by_provider_id(&self.db, call_sid)
            .await
            .map_err(|e| StageError::retryable(Stage::Lookup, e))?
            .ok_or_else(|| StageError::Aborted {
                stage: Stage::Lookup,
                message: "call log not found".to_string(),
            })
    }

    async fn run(&self, call_sid: &str, recording_url: &str) -> Result<(), StageError> {
        let log = self.load(call_sid).await?;

        // A: media
        let key = match log.recording_object_key.clone() {
            Some(key) => key,
            None => {
                let policy = RetryPolicy::with_attempts(self.settings.media_fetch_attempts);
                let key = media::acquire(
                    self.telephony.as_ref(),
                    self.store.as_ref(),
                    call_sid,
                    recording_url,
                    &policy,
                    &self.shutdown,
                )
                .await
                .map_err(|e| StageError::retryable(Stage::Media, e))?;

                call_logs::set_object_key(&self.db, call_sid, &key)
                    .await
                    .map_err(|e| StageError::retryable(Stage::Media, e))?;
                key
            }
        };
        self.mark_stage(call_sid, Stage::Media).await;

        // B + C: transcript with roles
        if log.transcript_text.is_none() {
            self.transcribe(call_sid, &key).await?;
        }
        self.mark_stage(call_sid, Stage::Transcription).await;

        // D: classification
        let log = self.load(call_sid).await?;
        if log.needs_classification() {
            let turns = log
                .transcript
                .as_ref()
                .map(|doc| doc.turns.as_slice())
                .unwrap_or_default();
            let classification = classification::classify(self.llm.as_deref(), turns).await;

            let written = call_logs::set_classification(
                &self.db,
                call_sid,
                classification.intent,
                classification.result,
                classification.department,
                classification.sentiment,
            )
            .await
            .map_err(|e| StageError::retryable(Stage::Classification, e))?;

            if written {
                info!(
                    call_sid,
                    intent = %classification.intent,
                    result = %classification.result,
                    department = %classification.department,
                    sentiment = classification.sentiment,
                    "Call classified"
                );
            }
        }
        self.mark_stage(call_sid, Stage::Classification).await;

        // KPIs are marker-guarded, so a repeat run never double counts. A call
        // still in progress is counted by its terminal status event instead.
        let log = self.load(call_sid).await?;
        if log.classified_at.is_some() && log.status.is_terminal() {
            self.rollups
                .apply_department_kpis(&log)
                .await
                .map_err(|e| StageError::retryable(Stage::Rollup, e))?;
        }

        Ok(())
    }

    async fn transcribe(&self, call_sid: &str, key: &str) -> Result<(), StageError> {
        let transcription = transcription::transcribe(
            self.stt.as_ref(),
            self.store.as_ref(),
            key,
            self.settings.read_url_ttl,
        )
        .await
        .map_err(|e| StageError::retryable(Stage::Transcription, e))?;

        if transcription.turns.is_empty() {
            return Err(StageError::Aborted {
                stage: Stage::Transcription,
                message: "transcription produced no turns".to_string(),
            });
        }

        let mut turns = transcription.turns;
        let roles = roles::assign_roles(
            self.llm.as_deref(),
            &mut turns,
            &self.settings.dealership_names,
        )
        .await;

        let document = TranscriptDocument {
            turns,
            language: transcription.language.unwrap_or_else(|| "en".to_string()),
            duration_sec: transcription
                .duration_secs
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| d.round() as u64)
                .unwrap_or(0),
            roles_assigned: roles.map(|r| r.is_resolved()).unwrap_or(false),
        };
        let text = document.full_text();

        let written = call_logs::set_transcript(&self.db, call_sid, &text, &document)
            .await
            .map_err(|e| StageError::retryable(Stage::Transcription, e))?;

        if written {
            info!(call_sid, turns = document.turns.len(), "Transcript stored");
        } else {
            debug!(call_sid, "Transcript already stored by another run");
        }
        Ok(())
    }
}
