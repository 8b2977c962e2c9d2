//! Per-(message, recipient) delivery tracking
//!
//! Rows are created at send time, one per active recipient. Acknowledgments
//! only move rows forward; a row already at or past the target is untouched.

use crate::error::AppResult;
use crate::models::{DeliveryRecord, DeliveryState};
use crate::services::membership_service::MembershipService;
use crate::store::ChatStore;
use chrono::Utc;
use uuid::Uuid;

pub struct DeliveryService;

impl DeliveryService {
    /// Move every row of `user_id` in the conversation to `read`
    pub async fn mark_read(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<u64> {
        Self::advance(store, conversation_id, user_id, DeliveryState::Read).await
    }

    /// Move `pending`/`sent` rows of `user_id` to `delivered`
    pub async fn mark_delivered(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<u64> {
        Self::advance(store, conversation_id, user_id, DeliveryState::Delivered).await
    }

    async fn advance(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        user_id: Uuid,
        target: DeliveryState,
    ) -> AppResult<u64> {
        MembershipService::ensure_member(store, conversation_id, user_id).await?;
        let changed = store
            .advance_deliveries(conversation_id, user_id, target, Utc::now())
            .await?;
        tracing::debug!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            target = %target,
            changed,
            "Delivery states advanced"
        );
        Ok(changed)
    }

    pub async fn list_states(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> AppResult<Vec<DeliveryRecord>> {
        MembershipService::ensure_member(store, conversation_id, viewer_id).await?;
        store.list_deliveries(conversation_id).await
    }
}
