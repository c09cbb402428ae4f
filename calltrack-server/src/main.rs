//! calltrack-server - dealership call tracking service
//!
//! Provisions tracking numbers, answers telephony webhooks, ingests call
//! recordings and maintains hourly call rollups.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use calltrack_common::config::{require, TomlConfig};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use calltrack_server::clients::deepgram::DeepgramClient;
use calltrack_server::clients::object_store::FsObjectStore;
use calltrack_server::clients::openai::OpenAiClient;
use calltrack_server::clients::twilio::{TwilioClient, WebhookVerifier};
use calltrack_server::clients::LanguageModel;
use calltrack_server::services::{PipelineSettings, RetrySweeper};
use calltrack_server::{AppState, Clients};

/// Command-line arguments for calltrack-server
#[derive(Parser, Debug)]
#[command(name = "calltrack-server")]
#[command(about = "Dealership call tracking service")]
#[command(version)]
struct Args {
    /// Path to calltrack.toml
    #[arg(short, long, env = "CALLTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.apply_env_overrides();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    let default_filter = format!("calltrack_server={0},calltrack_common={0},tower_http=info", config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;

    info!("Starting calltrack-server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Public base URL: {}", config.server.public_base_url);

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db = calltrack_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let shutdown = CancellationToken::new();

    let auth_token = require(&config.twilio.auth_token, "TWILIO_AUTH_TOKEN")?.to_string();
    let telephony = TwilioClient::new(
        require(&config.twilio.account_sid, "TWILIO_ACCOUNT_SID")?.to_string(),
        auth_token.clone(),
        config.twilio.api_base.clone(),
        shutdown.clone(),
    )
    .context("Failed to build Twilio client")?;

    let storage_root = config.storage_root();
    tokio::fs::create_dir_all(&storage_root)
        .await
        .with_context(|| format!("Failed to create storage root {}", storage_root.display()))?;
    info!("Recording storage: {}", storage_root.display());
    let store = FsObjectStore::new(
        storage_root,
        require(&config.storage.signing_secret, "CALLTRACK_SIGNING_SECRET")?.to_string(),
        &config.server.public_base_url,
    );

    let stt = DeepgramClient::new(
        require(&config.deepgram.api_key, "DEEPGRAM_API_KEY")?.to_string(),
        config.deepgram.model.clone(),
        config.deepgram.base_url.clone(),
    )
    .context("Failed to build Deepgram client")?;

    let llm: Option<Arc<dyn LanguageModel>> = match config.openai.api_key.clone() {
        Some(key) => Some(Arc::new(
            OpenAiClient::new(key, config.openai.model.clone(), config.openai.base_url.clone())
                .context("Failed to build OpenAI client")?,
        )),
        None => None,
    };

    let clients = Clients {
        telephony: Arc::new(telephony),
        store: Arc::new(store),
        stt: Arc::new(stt),
        llm,
        verifier: WebhookVerifier::new(auth_token, config.server.public_base_url.clone()),
    };

    let state = AppState::new(
        db.clone(),
        clients,
        &config.server.public_base_url,
        PipelineSettings::from_config(&config),
        shutdown.clone(),
    );

    let sweeper = RetrySweeper::new(
        db,
        Arc::clone(&state.pipeline),
        Duration::from_secs(config.pipeline.sweep_interval_secs),
    )
    .spawn(shutdown.clone());

    let app = calltrack_server::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("Invalid bind address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!("Retry sweeper ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
