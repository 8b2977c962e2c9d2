use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use realtime_messaging_service::{
    config::{self, StoreBackend},
    db, error, logging,
    middleware::auth::JwtVerifier,
    routes,
    services::attachment_store::LocalDiskStore,
    state::AppState,
    store::{memory::InMemoryStore, postgres::PgStore, ChatStore},
    websocket::ConnectionRegistry,
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let store: Arc<dyn ChatStore> = match cfg.store_backend {
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| error::AppError::Config("DATABASE_URL missing".into()))?;
            let pool = db::init_pool(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let state = AppState {
        store,
        registry: ConnectionRegistry::new(),
        config: cfg.clone(),
        auth: Arc::new(JwtVerifier::new(&cfg.jwt_secret)),
        attachments: Arc::new(LocalDiskStore::new(
            cfg.upload_dir.clone(),
            &cfg.public_base_url,
        )),
    };

    let bind_addr = format!("{}:{}", cfg.host, cfg.port);
    tracing::info!(%bind_addr, backend = ?cfg.store_backend, "starting realtime-messaging-service");

    let rest_state = state.clone();
    HttpServer::new(move || {
        let cors = build_cors(&rest_state.config.cors_allowed_origins);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(rest_state.clone()))
            .app_data(web::PayloadConfig::new(rest_state.config.max_upload_bytes))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))
}

fn build_cors(allowed_origins: &[String]) -> Cors {
    let cors = if allowed_origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .supports_credentials()
    };
    cors.allow_any_method().allow_any_header().max_age(3600)
}
