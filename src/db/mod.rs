pub mod models;
pub mod repository;

/// Fresh in-memory database with all migrations applied.
///
/// A single connection is kept alive for the lifetime of the pool; every new
/// in-memory connection would otherwise see its own empty database.
#[cfg(test)]
pub async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
