//! Background re-invocation of failed pipeline runs

use std::sync::Arc;
use std::time::Duration;

use calltrack_common::time::now;
use calltrack_common::Result;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::processing;
use crate::services::pipeline::{PipelineReport, RecordingIngestPipeline};

/// Ledger rows handled per sweep
const SWEEP_BATCH: u32 = 20;

pub struct RetrySweeper {
    db: SqlitePool,
    pipeline: Arc<RecordingIngestPipeline>,
    interval: Duration,
}

impl RetrySweeper {
    pub fn new(db: SqlitePool, pipeline: Arc<RecordingIngestPipeline>, interval: Duration) -> Self {
        Self {
            db,
            pipeline,
            interval,
        }
    }

    /// Re-run every due call once; returns how many were attempted
    pub async fn sweep_once(&self) -> Result<usize> {
        let due = processing::due(&self.db, now(), SWEEP_BATCH).await?;
        for (call_sid, recording_url) in &due {
            let report = self.pipeline.ensure_processed(call_sid, recording_url).await;
            debug!(call_sid = %call_sid, report = ?report, "Retry sweep processed call");
            if let PipelineReport::Failed { retry_at: None, .. } = report {
                warn!(call_sid = %call_sid, "Pipeline attempts exhausted");
            }
        }
        Ok(due.len())
    }

    /// Sweep on a fixed interval until `shutdown` fires
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Pipeline retry sweeper started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(0) => {}
                            Ok(n) => info!(calls = n, "Retry sweep finished"),
                            Err(e) => warn!(error = %e, "Retry sweep failed"),
                        }
                    }
                }
            }
            info!("Pipeline retry sweeper stopped");
        })
    }
}
