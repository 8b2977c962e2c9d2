//! PostgreSQL connection pool for the messaging service
//!
//! Wraps deadpool-postgres with env-driven sizing, a startup connectivity
//! check and periodic pool gauges.

mod metrics;

pub use metrics::update_pool_metrics;

use deadpool_postgres::tokio_postgres::{Config as PgConfig, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
pub use deadpool_postgres::PoolError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub type PgPool = Pool;

/// Database connection pool configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Service name for metrics labeling
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Connections opened eagerly once the pool is verified
    pub min_connections: u32,
    /// Timeout for opening a new connection to PostgreSQL
    pub connect_timeout_secs: u64,
    /// Timeout for waiting on a free pooled connection
    pub acquire_timeout_secs: u64,
    /// Interval of the background gauge refresh
    pub metrics_interval_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 20,
            min_connections: 5,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            metrics_interval_secs: 30,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbPoolError {
    #[error("DATABASE_URL environment variable not set")]
    MissingUrl,
    #[error("invalid database url: {0}")]
    InvalidUrl(#[source] tokio_postgres::Error),
    #[error("failed to build pool: {0}")]
    Build(String),
    #[error("database connection verification failed: {0}")]
    Connect(#[source] PoolError),
    #[error("database connection verification timed out after {0}s")]
    Timeout(u64),
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl DbConfig {
    /// Create a new DbConfig from environment variables
    pub fn from_env(service_name: &str) -> Result<Self, DbPoolError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| DbPoolError::MissingUrl)?;
        let defaults = Self::default();

        Ok(Self {
            service_name: service_name.to_string(),
            database_url,
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout_secs),
            metrics_interval_secs: env_or(
                "DB_METRICS_INTERVAL_SECS",
                defaults.metrics_interval_secs,
            ),
        })
    }

    /// Log pool configuration details
    pub fn log_config(&self) {
        info!(
            service = %self.service_name,
            max_connections = self.max_connections,
            min_connections = self.warm_connections(),
            connect_timeout_secs = self.connect_timeout_secs,
            acquire_timeout_secs = self.acquire_timeout_secs,
            "Database pool configuration"
        );
    }

    /// Minimum pool size, never above the maximum
    pub fn warm_connections(&self) -> u32 {
        self.min_connections.min(self.max_connections)
    }
}

/// Open up to `target` connections and return them to the pool idle
///
/// Best effort: a failure stops the warm-up and leaves the pool to grow on
/// demand.
async fn warm_up(pool: &Pool, target: u32, service: &str) -> usize {
    let mut held = Vec::with_capacity(target as usize);
    while held.len() < target as usize {
        match pool.get().await {
            Ok(client) => held.push(client),
            Err(e) => {
                warn!(
                    service = %service,
                    error = %e,
                    opened = held.len(),
                    "Pool warm-up stopped early"
                );
                break;
            }
        }
    }
    held.len()
}

/// Build a deadpool-postgres pool and verify that PostgreSQL answers
pub async fn create_pool(config: DbConfig) -> Result<PgPool, DbPoolError> {
    debug!(
        service = %config.service_name,
        max = config.max_connections,
        "Creating database pool"
    );

    let pg_config: PgConfig = config
        .database_url
        .parse()
        .map_err(DbPoolError::InvalidUrl)?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(config.max_connections as usize)
        .wait_timeout(Some(Duration::from_secs(config.acquire_timeout_secs)))
        .create_timeout(Some(Duration::from_secs(config.connect_timeout_secs)))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| DbPoolError::Build(e.to_string()))?;

    let verify = async {
        let client = pool.get().await.map_err(DbPoolError::Connect)?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DbPoolError::Connect(PoolError::Backend(e)))?;
        Ok::<(), DbPoolError>(())
    };

    match tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), verify).await {
        Ok(Ok(())) => {
            let warm = warm_up(&pool, config.warm_connections(), &config.service_name).await;
            info!(service = %config.service_name, warm, "Database pool created and verified");
            update_pool_metrics(&pool, &config.service_name);

            let pool_clone = pool.clone();
            let service = config.service_name.clone();
            let every = Duration::from_secs(config.metrics_interval_secs.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                loop {
                    interval.tick().await;
                    update_pool_metrics(&pool_clone, &service);
                }
            });

            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(service = %config.service_name, error = %e, "Database connection verification failed");
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout_secs = config.connect_timeout_secs,
                "Database connection verification timeout"
            );
            Err(DbPoolError::Timeout(config.connect_timeout_secs))
        }
    }
}
