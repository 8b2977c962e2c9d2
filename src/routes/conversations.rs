use crate::error::AppError;
use crate::middleware::guards::User;
use crate::services::conversation_service::ConversationService;
use crate::services::delivery_service::DeliveryService;
use crate::services::message_service::MessageService;
use crate::state::AppState;
use actix_web::{delete, get, post, put, web, HttpResponse};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    pub members: Vec<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub body: String,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub mentions: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct AttachmentQuery {
    pub filename: String,
    /// Optional caption sent alongside the file
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedResponse {
    pub hidden: u64,
}

/// POST /conversations
/// Creates a conversation, or returns the existing one-to-one chat for the pair
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let resolved = ConversationService::create(
        state.store.as_ref(),
        &state.registry,
        user.id,
        &body.members,
        body.is_group,
        body.title.as_deref(),
    )
    .await?;

    Ok(HttpResponse::Created().json(resolved.detail))
}

/// GET /conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let conversations = ConversationService::list(state.store.as_ref(), user.id).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// GET /conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let summary =
        ConversationService::get(state.store.as_ref(), conversation_id.into_inner(), user.id)
            .await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// DELETE /conversations/{id}
/// Removes the caller's membership only; the conversation is purged with its last member
#[delete("/conversations/{id}")]
pub async fn delete_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    ConversationService::delete_for_self(
        state.store.as_ref(),
        &state.registry,
        conversation_id.into_inner(),
        user.id,
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /conversations/{id}/members
#[get("/conversations/{id}/members")]
pub async fn list_members(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let members =
        ConversationService::members(state.store.as_ref(), conversation_id.into_inner(), user.id)
            .await?;
    Ok(HttpResponse::Ok().json(members))
}

/// GET /conversations/{id}/messages
/// Messages inside the caller's visibility window, oldest first
#[get("/conversations/{id}/messages")]
pub async fn list_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let messages =
        MessageService::list_visible(state.store.as_ref(), conversation_id.into_inner(), user.id)
            .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /conversations/{id}/messages
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let store = state.store.as_ref();
    let sent = MessageService::send(
        store,
        &state.registry,
        conversation_id.into_inner(),
        user.id,
        &body.body,
        body.reply_to_id,
        &body.mentions,
    )
    .await?;

    let view = MessageService::render(store, user.id, vec![sent.message])
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("sent message not rendered".into()))?;
    Ok(HttpResponse::Created().json(view))
}

/// DELETE /conversations/{id}/messages
/// Clears the chat for the caller only
#[delete("/conversations/{id}/messages")]
pub async fn clear_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let hidden =
        MessageService::clear_for_self(state.store.as_ref(), conversation_id.into_inner(), user.id)
            .await?;
    Ok(HttpResponse::Ok().json(ClearedResponse { hidden }))
}

/// POST /conversations/{id}/attachments?filename=...&body=...
/// Raw file bytes in the request body
#[post("/conversations/{id}/attachments")]
pub async fn upload_attachment(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<AttachmentQuery>,
    payload: Bytes,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    if query.filename.trim().is_empty() {
        return Err(AppError::invalid("filename is required"));
    }

    let store = state.store.as_ref();
    let sent = MessageService::send_attachment(
        store,
        &state.registry,
        state.attachments.as_ref(),
        conversation_id.into_inner(),
        user.id,
        &query.filename,
        query.body.as_deref(),
        &payload,
        state.config.max_upload_bytes,
    )
    .await?;

    let view = MessageService::render(store, user.id, vec![sent.message])
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("sent message not rendered".into()))?;
    Ok(HttpResponse::Created().json(view))
}

/// PUT /conversations/{id}/markRead
#[put("/conversations/{id}/markRead")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    let advanced = DeliveryService::mark_read(state.store.as_ref(), conversation_id, user.id).await?;
    tracing::debug!(conversation_id = %conversation_id, user_id = %user.id, advanced, "Marked read");
    Ok(HttpResponse::NoContent().finish())
}

/// PUT /conversations/{id}/markDelivered
#[put("/conversations/{id}/markDelivered")]
pub async fn mark_delivered(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    let advanced =
        DeliveryService::mark_delivered(state.store.as_ref(), conversation_id, user.id).await?;
    tracing::debug!(conversation_id = %conversation_id, user_id = %user.id, advanced, "Marked delivered");
    Ok(HttpResponse::NoContent().finish())
}

/// GET /conversations/{id}/states
#[get("/conversations/{id}/states")]
pub async fn list_states(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let states =
        DeliveryService::list_states(state.store.as_ref(), conversation_id.into_inner(), user.id)
            .await?;
    Ok(HttpResponse::Ok().json(states))
}
