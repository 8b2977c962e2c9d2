use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{CallKind, CallState};
use crate::services::call_service::CallService;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct StartCallQuery {
    #[serde(default = "default_call_kind")]
    pub kind: CallKind,
}

fn default_call_kind() -> CallKind {
    CallKind::Voice
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    pub call_id: Uuid,
    pub state: CallState,
}

/// POST /conversations/{id}/calls?kind=voice|video
/// Records the call; media is negotiated peer-to-peer over the realtime channel
#[post("/conversations/{id}/calls")]
pub async fn start_call(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<StartCallQuery>,
) -> Result<HttpResponse, AppError> {
    let call = CallService::start_call(
        state.store.as_ref(),
        conversation_id.into_inner(),
        user.id,
        query.kind,
    )
    .await?;

    Ok(HttpResponse::Created().json(CallResponse {
        call_id: call.id,
        state: call.state,
    }))
}
