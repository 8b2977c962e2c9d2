use crate::error::AppError;
use crate::metrics;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde_json::json;

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "connections": state.registry.connection_count().await,
    }))
}

/// Prometheus text exposition
#[get("/metrics")]
pub async fn metrics_handler() -> Result<HttpResponse, AppError> {
    let body = metrics::render()?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}
