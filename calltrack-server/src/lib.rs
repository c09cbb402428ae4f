//! calltrack-server library interface
//!
//! Exposes the services and router for the binary and integration tests.

pub mod api;
pub mod clients;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use calltrack_common::Error;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::clients::twilio::WebhookVerifier;
use crate::clients::{LanguageModel, ObjectStore, SpeechToText, TelephonyProvider};
use crate::services::{
    CallLifecycleGateway, HourlyRollupAggregator, NumberProvisioner, PipelineSettings,
    RecordingIngestPipeline,
};

/// Outbound dependencies wired into the services
pub struct Clients {
    pub telephony: Arc<dyn TelephonyProvider>,
    pub store: Arc<dyn ObjectStore>,
    pub stt: Arc<dyn SpeechToText>,
    /// Absent when no model key is configured; classification falls back to heuristics
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub verifier: WebhookVerifier,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub provisioner: Arc<NumberProvisioner>,
    pub gateway: Arc<CallLifecycleGateway>,
    pub pipeline: Arc<RecordingIngestPipeline>,
    pub rollups: HourlyRollupAggregator,
    pub object_store: Arc<dyn ObjectStore>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last unexpected error, reported by /health
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Cancels background work on shutdown
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        clients: Clients,
        public_base_url: &str,
        settings: PipelineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let rollups = HourlyRollupAggregator::new(db.clone());

        let pipeline = Arc::new(RecordingIngestPipeline::new(
            db.clone(),
            Arc::clone(&clients.telephony),
            Arc::clone(&clients.store),
            clients.stt,
            clients.llm,
            rollups.clone(),
            settings,
            shutdown.clone(),
        ));

        let gateway = Arc::new(CallLifecycleGateway::new(
            db.clone(),
            clients.verifier,
            rollups.clone(),
            Arc::clone(&pipeline),
        ));

        let provisioner = Arc::new(NumberProvisioner::new(
            db.clone(),
            clients.telephony,
            public_base_url,
        ));

        Self {
            db,
            provisioner,
            gateway,
            pipeline,
            rollups,
            object_store: clients.store,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            shutdown,
        }
    }

    /// Remember server-side failures for /health; client errors are ignored
    pub async fn record_error(&self, err: &Error) {
        let server_side = matches!(
            err,
            Error::Database(_)
                | Error::Io(_)
                | Error::Config(_)
                | Error::Transient(_)
                | Error::Fatal(_)
                | Error::Internal(_)
        );
        if server_side {
            *self.last_error.write().await = Some(err.to_string());
        }
    }

    /// Pass a service result through, recording it if it failed
    pub async fn track<T>(&self, result: calltrack_common::Result<T>) -> calltrack_common::Result<T> {
        if let Err(err) = &result {
            self.record_error(err).await;
        }
        result
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::webhook_routes())
        .merge(api::tracking_number_routes())
        .merge(api::rollup_routes())
        .merge(api::media_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
