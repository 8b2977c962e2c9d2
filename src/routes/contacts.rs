use crate::error::AppError;
use crate::middleware::guards::User;
use crate::services::contact_service::ContactService;
use crate::state::AppState;
use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct AddContactRequest {
    pub phone: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateContactRequest {
    #[serde(default)]
    pub alias: Option<String>,
}

#[get("/contacts")]
pub async fn list_contacts(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let contacts = ContactService::list(state.store.as_ref(), user.id).await?;
    Ok(HttpResponse::Ok().json(contacts))
}

/// POST /contacts
/// Looks the user up by phone number
#[post("/contacts")]
pub async fn add_contact(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<AddContactRequest>,
) -> Result<HttpResponse, AppError> {
    let contact =
        ContactService::add(state.store.as_ref(), user.id, &body.phone, body.alias.as_deref())
            .await?;
    Ok(HttpResponse::Created().json(contact))
}

#[put("/contacts/{id}")]
pub async fn update_contact(
    state: web::Data<AppState>,
    user: User,
    contact_id: web::Path<Uuid>,
    body: web::Json<UpdateContactRequest>,
) -> Result<HttpResponse, AppError> {
    let contact = ContactService::update_alias(
        state.store.as_ref(),
        user.id,
        contact_id.into_inner(),
        body.alias.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(contact))
}

#[delete("/contacts/{id}")]
pub async fn delete_contact(
    state: web::Data<AppState>,
    user: User,
    contact_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    ContactService::delete(state.store.as_ref(), user.id, contact_id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
