use crate::error::AppError;
use db_pool::{create_pool, DbConfig, PgPool};

// Embedded at compile time so startup does not depend on the working directory
const MIGRATIONS: &[(&str, &str)] = &[("0001_init", include_str!("../migrations/0001_init.sql"))];

pub async fn init_pool(database_url: &str) -> Result<PgPool, AppError> {
    let mut cfg = DbConfig::from_env("realtime-messaging-service").unwrap_or_default();
    if cfg.database_url.is_empty() {
        cfg.service_name = "realtime-messaging-service".to_string();
        cfg.database_url = database_url.to_string();
    }
    cfg.log_config();
    let pool = create_pool(cfg)
        .await
        .map_err(|e| AppError::StartServer(format!("database pool: {e}")))?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Apply every embedded migration not yet recorded in `schema_migrations`
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    let client = pool.get().await?;
    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (\
                version VARCHAR(64) PRIMARY KEY, \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
        )
        .await?;

    for (version, sql) in MIGRATIONS {
        let applied = client
            .query_opt(
                "SELECT version FROM schema_migrations WHERE version = $1",
                &[version],
            )
            .await?
            .is_some();
        if applied {
            continue;
        }
        client.batch_execute(sql).await?;
        client
            .execute(
                "INSERT INTO schema_migrations (version) VALUES ($1)",
                &[version],
            )
            .await?;
        tracing::info!(migration = %version, "migration applied");
    }
    Ok(())
}
