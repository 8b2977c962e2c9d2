use crate::error::AppResult;
use crate::models::{Call, CallKind, CallState};
use crate::services::membership_service::MembershipService;
use crate::store::ChatStore;
use chrono::Utc;
use uuid::Uuid;

pub struct CallService;

impl CallService {
    /// Record a call session with its initiator as first participant
    ///
    /// Signaling itself flows over the realtime hub; this is bookkeeping only.
    pub async fn start_call(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        initiator_id: Uuid,
        kind: CallKind,
    ) -> AppResult<Call> {
        MembershipService::ensure_active_member(store, conversation_id, initiator_id).await?;

        let call = Call {
            id: Uuid::new_v4(),
            conversation_id,
            kind,
            state: CallState::Started,
            created_by: initiator_id,
            started_at: Utc::now(),
        };
        store.insert_call(&call).await?;

        tracing::info!(
            call_id = %call.id,
            conversation_id = %conversation_id,
            kind = call.kind.to_db(),
            "Call started"
        );
        Ok(call)
    }
}
