//! Prometheus gauges for the connection pool

use deadpool_postgres::Pool;
use prometheus::{register_int_gauge_vec, IntGaugeVec};

lazy_static::lazy_static! {
    /// Database connection pool size by state (idle/active/max)
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Callers currently waiting for a connection
    static ref DB_POOL_WAITING: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_waiting",
        "Callers waiting for a pooled connection",
        &["service"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Refresh the pool gauges from the current pool status
pub fn update_pool_metrics(pool: &Pool, service: &str) {
    let status = pool.status();
    let size = status.size as i64;
    let idle = status.available as i64;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(size - idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(status.max_size as i64);
    DB_POOL_WAITING
        .with_label_values(&[service])
        .set(status.waiting as i64);
}
