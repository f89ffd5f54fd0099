//! Connection pool and blocking execution helpers.

use diesel::r2d2::{self, ConnectionManager, PooledConnection};
use diesel::PgConnection;
use std::time::Duration;
use tracing::error;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

pub fn create_db_pool(config: &Config) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(&config.database.url);
    r2d2::Pool::builder()
        .max_size(config.database.max_connections)
        .min_idle(Some(config.database.min_connections))
        .connection_timeout(Duration::from_secs(config.database.connection_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.database.idle_timeout_secs)))
        .build(manager)
        .expect("Failed to create database pool")
}

pub fn create_db_pool_with_url(database_url: &str) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder()
        .max_size(10)
        .min_idle(Some(2))
        .connection_timeout(Duration::from_secs(30))
        .idle_timeout(Some(Duration::from_secs(600)))
        .build(manager)
        .expect("Failed to create database pool")
}

pub fn get_db_conn(pool: &DbPool) -> ApiResult<DbConn> {
    pool.get().map_err(|e| {
        error!(error = %e, "Database connection error");
        ApiError::from(e)
    })
}

/// Runs `f` with a pooled connection on the blocking thread pool.
pub async fn with_conn<T, F>(pool: &DbPool, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> ApiResult<T> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = get_db_conn(&pool)?;
        f(&mut conn)
    })
    .await
    .map_err(|e| {
        error!(error = %e, "Blocking database task failed");
        ApiError::internal("Database task failed")
    })?
}
