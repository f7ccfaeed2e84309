use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub mod models;
pub mod queries;

/// Connect to Postgres and run migrations. Unlike the persistence engine
/// itself (an external collaborator), the pool is owned here and handed to
/// the request context; there is no process-wide singleton.
pub async fn initialize_database(
    database_url: &str,
) -> Result<PgPool, Box<dyn std::error::Error + Send + Sync>> {
    let pool = connect_with_retry(database_url).await?;

    // Test query to ensure the connection is valid
    sqlx::query("SELECT 1").execute(&pool).await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Database initialized successfully");
    Ok(pool)
}

async fn connect_with_retry(
    database_url: &str,
) -> Result<PgPool, Box<dyn std::error::Error + Send + Sync>> {
    let max_retries = 5;
    let retry_delay = Duration::from_secs(3);

    for attempt in 1..=max_retries {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                tracing::warn!(
                    "Database connection attempt {} of {} failed: {}",
                    attempt,
                    max_retries,
                    e
                );
                if attempt < max_retries {
                    tokio::time::sleep(retry_delay).await;
                } else {
                    return Err(format!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries, e
                    )
                    .into());
                }
            }
        }
    }

    unreachable!()
}
