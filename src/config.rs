use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Which durable store backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!("unknown STORE_BACKEND '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store_backend: StoreBackend,
    /// Required when the postgres backend is selected
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub upload_dir: String,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub ws_heartbeat_interval: Duration,
    pub ws_client_timeout: Duration,
    /// Empty means any origin
    pub cors_allowed_origins: Vec<String>,
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(value) => StoreBackend::parse(&value)?,
            Err(_) => StoreBackend::Postgres,
        };
        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.trim().is_empty() {
            return Err(AppError::Config("JWT_SECRET is empty".into()));
        }

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parsed("PORT", 8000u16);
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let heartbeat = parsed("WS_HEARTBEAT_INTERVAL_SECS", 10u64);
        let client_timeout = parsed("WS_CLIENT_TIMEOUT_SECS", 25u64);
        if client_timeout <= heartbeat {
            return Err(AppError::Config(
                "WS_CLIENT_TIMEOUT_SECS must exceed WS_HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            store_backend,
            database_url,
            jwt_secret,
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
            public_base_url,
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES", 25 * 1024 * 1024usize),
            ws_heartbeat_interval: Duration::from_secs(heartbeat),
            ws_client_timeout: Duration::from_secs(client_timeout),
            cors_allowed_origins,
        })
    }

    /// Configuration for tests and local runs without any environment
    pub fn for_memory(jwt_secret: &str, upload_dir: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            store_backend: StoreBackend::Memory,
            database_url: None,
            jwt_secret: jwt_secret.to_string(),
            upload_dir: upload_dir.to_string(),
            public_base_url: "http://localhost:8000".to_string(),
            max_upload_bytes: 25 * 1024 * 1024,
            ws_heartbeat_interval: Duration::from_secs(10),
            ws_client_timeout: Duration::from_secs(25),
            cors_allowed_origins: Vec::new(),
        }
    }
}
