use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::AdminSuccession;
use crate::services::membership_service::MembershipService;
use crate::state::AppState;
use actix_web::{delete, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct AddMembersRequest {
    pub members: Vec<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMembersResponse {
    pub added: Vec<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMemberResponse {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    /// Set when the departing admin's role moved to someone else
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_admin_id: Option<Uuid>,
}

/// DELETE /conversations/{id}/members/{userId}
/// Self-leave when the target is the caller, admin kick otherwise
#[delete("/conversations/{id}/members/{user_id}")]
pub async fn remove_member(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, target_id) = path.into_inner();
    let succession = MembershipService::remove_member(
        state.store.as_ref(),
        &state.registry,
        conversation_id,
        user.id,
        target_id,
    )
    .await?;

    let new_admin_id = match succession {
        AdminSuccession::Transferred(id) => Some(id),
        AdminSuccession::Unchanged | AdminSuccession::Orphaned => None,
    };
    Ok(HttpResponse::Ok().json(RemoveMemberResponse {
        conversation_id,
        user_id: target_id,
        new_admin_id,
    }))
}

/// POST /conversations/{id}/members/add
/// Admin only; users already active are skipped
#[post("/conversations/{id}/members/add")]
pub async fn add_members(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<AddMembersRequest>,
) -> Result<HttpResponse, AppError> {
    let added = MembershipService::add_members(
        state.store.as_ref(),
        &state.registry,
        conversation_id.into_inner(),
        user.id,
        &body.members,
    )
    .await?;
    Ok(HttpResponse::Ok().json(AddMembersResponse { added }))
}
