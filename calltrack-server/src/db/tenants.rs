//! Tenant capacity counter and marketing-source ownership
//!
//! The used-count is only changed through range-guarded UPDATEs, never by
//! read-modify-write, so no lock is held across provider calls.

use calltrack_common::time::{format_timestamp, now};
use calltrack_common::Result;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::Tenant;

/// Claim one tracking-number slot; false when the tenant is full or unknown
pub async fn reserve_slot(pool: &SqlitePool, tenant_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE tenants
        SET tracking_numbers_used_count = tracking_numbers_used_count + 1,
            updated_at = ?
        WHERE id = ? AND tracking_numbers_used_count < max_tracking_numbers
        "#,
    )
    .bind(format_timestamp(now()))
    .bind(tenant_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Return one slot, floored at zero
pub async fn release_slot<'e, E>(executor: E, tenant_id: Uuid) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE tenants
        SET tracking_numbers_used_count = tracking_numbers_used_count - 1,
            updated_at = ?
        WHERE id = ? AND tracking_numbers_used_count > 0
        "#,
    )
    .bind(format_timestamp(now()))
    .bind(tenant_id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_tenant(pool: &SqlitePool, tenant_id: Uuid) -> Result<Option<Tenant>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, timezone, max_tracking_numbers, tracking_numbers_used_count
        FROM tenants
        WHERE id = ?
        "#,
    )
    .bind(tenant_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let id: String = row.get("id");
        Ok(Tenant {
            id: parse_uuid(&id)?,
            name: row.get("name"),
            timezone: row.get("timezone"),
            max_tracking_numbers: row.get("max_tracking_numbers"),
            tracking_numbers_used_count: row.get("tracking_numbers_used_count"),
        })
    })
    .transpose()
}

/// Seed a tenant (tenant CRUD lives outside this service)
pub async fn insert_tenant(pool: &SqlitePool, tenant: &Tenant) -> Result<()> {
    let stamp = format_timestamp(now());
    sqlx::query(
        r#"
        INSERT INTO tenants (
            id, name, timezone, max_tracking_numbers, tracking_numbers_used_count,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant.id.to_string())
    .bind(&tenant.name)
    .bind(&tenant.timezone)
    .bind(tenant.max_tracking_numbers)
    .bind(tenant.tracking_numbers_used_count)
    .bind(&stamp)
    .bind(&stamp)
    .execute(pool)
    .await?;
    Ok(())
}

/// Ownership-scoped lookup; `None` when missing or owned by another tenant
pub async fn find_owned_marketing_source<'e, E>(
    executor: E,
    tenant_id: Uuid,
    marketing_source_id: Uuid,
) -> Result<Option<Uuid>>
where
    E: SqliteExecutor<'e>,
{
    let id: Option<String> =
        sqlx::query_scalar("SELECT id FROM marketing_sources WHERE id = ? AND tenant_id = ?")
            .bind(marketing_source_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(executor)
            .await?;

    id.as_deref().map(parse_uuid).transpose()
}

/// Seed a marketing source (CRUD lives outside this service)
pub async fn insert_marketing_source(
    pool: &SqlitePool,
    tenant_id: Uuid,
    id: Uuid,
    name: &str,
) -> Result<()> {
    let stamp = format_timestamp(now());
    sqlx::query(
        "INSERT INTO marketing_sources (id, tenant_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .bind(name)
    .bind(&stamp)
    .bind(&stamp)
    .execute(pool)
    .await?;
    Ok(())
}
