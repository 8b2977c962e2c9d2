use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::DeleteMode;
use crate::services::message_service::MessageService;
use crate::state::AppState;
use actix_web::{delete, post, put, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub body: String,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    pub mode: DeleteMode,
}

#[derive(Deserialize)]
pub struct ReactionQuery {
    pub emoji: String,
}

/// PUT /messages/{id}
/// Only the sender may edit; returns the edited message
#[put("/messages/{id}")]
pub async fn edit_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<EditMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let store = state.store.as_ref();
    let message = MessageService::edit(
        store,
        &state.registry,
        message_id.into_inner(),
        user.id,
        &body.body,
    )
    .await?;

    let view = MessageService::render(store, user.id, vec![message])
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("edited message not rendered".into()))?;
    Ok(HttpResponse::Ok().json(view))
}

/// DELETE /messages/{id}?mode=self|everyone
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    query: web::Query<DeleteQuery>,
) -> Result<HttpResponse, AppError> {
    MessageService::delete(
        state.store.as_ref(),
        &state.registry,
        message_id.into_inner(),
        user.id,
        query.mode,
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /messages/{id}/reactions?emoji=...
/// Reacting again replaces the caller's previous emoji
#[post("/messages/{id}/reactions")]
pub async fn add_reaction(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    query: web::Query<ReactionQuery>,
) -> Result<HttpResponse, AppError> {
    MessageService::react(
        state.store.as_ref(),
        &state.registry,
        message_id.into_inner(),
        user.id,
        &query.emoji,
    )
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

/// DELETE /messages/{id}/reactions
#[delete("/messages/{id}/reactions")]
pub async fn remove_reaction(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    MessageService::remove_reaction(
        state.store.as_ref(),
        &state.registry,
        message_id.into_inner(),
        user.id,
    )
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}
