//! Database initialization tests

use calltrack_common::db::init_database;
use calltrack_common::Error;
use sqlx::Row;
use tempfile::TempDir;

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.get::<String, _>("name"))
        .collect()
}

#[tokio::test]
async fn creates_all_tables() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("nested/ct.db")).await.unwrap();

    let tables = table_names(&pool).await;
    for expected in [
        "call_department_hourly_kpis",
        "call_logs",
        "call_processing",
        "call_volume_hourly",
        "marketing_sources",
        "number_routes",
        "tenants",
        "tracking_numbers",
    ] {
        assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
    }
}

#[tokio::test]
async fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ct.db");
    let pool = init_database(&path).await.unwrap();
    pool.close().await;
    let pool = init_database(&path).await.unwrap();
    assert_eq!(table_names(&pool).await.len(), 8);
}

#[tokio::test]
async fn capacity_check_constraint_maps_to_validation() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("ct.db")).await.unwrap();

    let err: Error = sqlx::query(
        "INSERT INTO tenants (id, name, max_tracking_numbers, tracking_numbers_used_count, created_at, updated_at)
         VALUES ('t1', 'Dealer', 1, 2, 'x', 'x')",
    )
    .execute(&pool)
    .await
    .unwrap_err()
    .into();

    assert!(matches!(err, Error::Validation(_)), "got {:?}", err);
}

#[tokio::test]
async fn second_active_route_is_conflict() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("ct.db")).await.unwrap();

    sqlx::query("INSERT INTO tenants (id, name, max_tracking_numbers, created_at, updated_at) VALUES ('t1', 'Dealer', 5, 'x', 'x')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO tracking_numbers (id, number, tenant_id, created_at, updated_at) VALUES ('n1', '+15550001111', 't1', 'x', 'x')")
        .execute(&pool)
        .await
        .unwrap();

    let insert_route = |id: &'static str| {
        sqlx::query("INSERT INTO number_routes (id, tracking_number_id, status, created_at, updated_at) VALUES (?, 'n1', 'active', 'x', 'x')")
            .bind(id)
    };
    insert_route("r1").execute(&pool).await.unwrap();
    let err: Error = insert_route("r2").execute(&pool).await.unwrap_err().into();
    assert!(matches!(err, Error::Conflict(_)), "got {:?}", err);

    // A retired route does not block a new active one
    sqlx::query("UPDATE number_routes SET status = 'deleted' WHERE id = 'r1'")
        .execute(&pool)
        .await
        .unwrap();
    insert_route("r2").execute(&pool).await.unwrap();
}
