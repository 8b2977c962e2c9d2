//! Best-effort realtime emission shared by the services
//!
//! Failures here never fail the originating request.

use crate::models::Membership;
use crate::websocket::events::OutboundEvent;
use crate::websocket::{ConnectionId, ConnectionRegistry, Scope};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub async fn emit(
    registry: &ConnectionRegistry,
    scopes: &[Scope],
    event: &OutboundEvent,
    skip: Option<ConnectionId>,
) -> usize {
    match event.to_frame() {
        Ok(frame) => registry.publish(scopes, &frame, skip).await,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode realtime event");
            0
        }
    }
}

pub async fn emit_to_viewer(
    registry: &ConnectionRegistry,
    conversation_id: Uuid,
    viewer: Uuid,
    event: &OutboundEvent,
) -> usize {
    match event.to_frame() {
        Ok(frame) => registry.publish_to_viewer(conversation_id, viewer, &frame).await,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode realtime event");
            0
        }
    }
}

pub async fn broadcast(registry: &ConnectionRegistry, event: &OutboundEvent) -> usize {
    match event.to_frame() {
        Ok(frame) => registry.broadcast_all(&frame).await,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode realtime event");
            0
        }
    }
}

/// User scopes of the members whose window includes a message created at
/// `created_at`; departed members keep only what they saw before leaving
pub fn members_who_can_see(members: &[Membership], created_at: DateTime<Utc>) -> Vec<Scope> {
    members
        .iter()
        .filter(|m| m.can_see(created_at))
        .map(|m| Scope::User(m.user_id))
        .collect()
}
