//! Database initialization
//!
//! Opens (or creates) the SQLite file, applies connection PRAGMAs and creates
//! every table idempotently. Timestamps are RFC 3339 UTC text and ids are
//! UUID text throughout.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-connection settings; the pool may open connections lazily
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_tenants_table(pool).await?;
    create_marketing_sources_table(pool).await?;
    create_tracking_numbers_table(pool).await?;
    create_number_routes_table(pool).await?;
    create_call_logs_table(pool).await?;
    create_call_volume_hourly_table(pool).await?;
    create_call_department_hourly_kpis_table(pool).await?;
    create_call_processing_table(pool).await?;
    Ok(())
}

/// Tenants (dealership businesses) with the tracking-number capacity counter
async fn create_tenants_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            timezone TEXT NOT NULL DEFAULT 'UTC',
            max_tracking_numbers INTEGER NOT NULL DEFAULT 0,
            tracking_numbers_used_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (tracking_numbers_used_count >= 0),
            CHECK (tracking_numbers_used_count <= max_tracking_numbers)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_marketing_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS marketing_sources (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_marketing_sources_tenant ON marketing_sources(tenant_id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_tracking_numbers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracking_numbers (
            id TEXT PRIMARY KEY,
            number TEXT NOT NULL,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            marketing_source_id TEXT REFERENCES marketing_sources(id),
            provider_number_id TEXT UNIQUE,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'suspended', 'releasing', 'released')),
            country TEXT,
            region TEXT,
            purchased_at TEXT,
            released_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live lease per E.164 value; released rows keep their history
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_live_tracking_number
        ON tracking_numbers(number) WHERE status <> 'released'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tracking_numbers_tenant ON tracking_numbers(tenant_id, status)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_number_routes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS number_routes (
            id TEXT PRIMARY KEY,
            tracking_number_id TEXT NOT NULL REFERENCES tracking_numbers(id),
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'suspended', 'deleted')),
            forwarding_voice_number TEXT,
            recording_enabled INTEGER NOT NULL DEFAULT 1,
            effective_from TEXT,
            effective_to TEXT,
            rules TEXT,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_active_route_per_tn
        ON number_routes(tracking_number_id) WHERE status = 'active'
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_call_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_logs (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            tracking_number_id TEXT NOT NULL REFERENCES tracking_numbers(id),
            marketing_source_id TEXT,
            provider_call_id TEXT NOT NULL UNIQUE,
            direction TEXT NOT NULL DEFAULT 'inbound',
            status TEXT NOT NULL DEFAULT 'queued',
            caller_number TEXT,
            receiver_number TEXT,
            call_started_at TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            recording_url TEXT,
            recording_object_key TEXT,
            transcript_text TEXT,
            transcript_json TEXT,
            result TEXT NOT NULL DEFAULT 'none',
            intent TEXT NOT NULL DEFAULT 'none',
            department TEXT NOT NULL DEFAULT 'none',
            sentiment INTEGER CHECK (sentiment IS NULL OR (sentiment BETWEEN 1 AND 5)),
            classified_at TEXT,
            volume_rolled_up_at TEXT,
            kpi_rolled_up_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_call_logs_tenant_started ON call_logs(tenant_id, call_started_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Hourly call volume. An unattributed marketing source is stored as ''
/// so the upsert conflict target always matches.
async fn create_call_volume_hourly_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_volume_hourly (
            tenant_id TEXT NOT NULL,
            marketing_source_id TEXT NOT NULL DEFAULT '',
            bucket_start_utc TEXT NOT NULL,
            total_calls INTEGER NOT NULL DEFAULT 0,
            total_seconds INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, marketing_source_id, bucket_start_utc)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_call_department_hourly_kpis_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_department_hourly_kpis (
            tenant_id TEXT NOT NULL,
            marketing_source_id TEXT NOT NULL DEFAULT '',
            department TEXT NOT NULL DEFAULT 'none',
            bucket_start_utc TEXT NOT NULL,
            total_calls INTEGER NOT NULL DEFAULT 0,
            connected_calls INTEGER NOT NULL DEFAULT 0,
            requested_appointments INTEGER NOT NULL DEFAULT 0,
            booked_appointments INTEGER NOT NULL DEFAULT 0,
            sentiment_sum INTEGER NOT NULL DEFAULT 0,
            sentiment_count INTEGER NOT NULL DEFAULT 0,
            total_seconds INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, marketing_source_id, department, bucket_start_utc)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Per-call pipeline ledger
async fn create_call_processing_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_processing (
            provider_call_id TEXT PRIMARY KEY,
            recording_url TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_stage TEXT,
            last_error TEXT,
            next_attempt_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_call_processing_due ON call_processing(next_attempt_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
