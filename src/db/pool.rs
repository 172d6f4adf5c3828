//! PostgreSQL pool for the chat store.

use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

pub type DbPool = sqlx::PgPool;

const MAX_CONNECTIONS: u32 = 10;

/// Connect eagerly so a bad `DATABASE_URL` fails at startup rather than on the first message.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await?;
    info!(max_connections = MAX_CONNECTIONS, "connected to postgres");
    Ok(pool)
}
