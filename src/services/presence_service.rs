//! Presence lifecycle: registry transition, persisted flag, process-wide
//! `usuario_estado` broadcast

use crate::services::fanout;
use crate::store::ChatStore;
use crate::websocket::events::OutboundEvent;
use crate::websocket::{ConnectionId, ConnectionRegistry, PresenceChange};

pub struct PresenceService;

impl PresenceService {
    pub async fn register(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        connection: ConnectionId,
    ) -> Option<PresenceChange> {
        let change = registry.register(connection).await?;
        Self::publish(store, registry, change).await;
        Some(change)
    }

    /// No-op when a newer connection of the same user is on record
    pub async fn disconnect(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        connection: ConnectionId,
    ) -> Option<PresenceChange> {
        let change = registry.disconnect(connection).await?;
        Self::publish(store, registry, change).await;
        Some(change)
    }

    async fn publish(store: &dyn ChatStore, registry: &ConnectionRegistry, change: PresenceChange) {
        if let Err(e) = store
            .set_presence(change.user_id, change.online, change.last_seen)
            .await
        {
            tracing::warn!(error = %e, user_id = %change.user_id, "Failed to persist presence");
        }

        tracing::info!(
            user_id = %change.user_id,
            online = change.online,
            "Presence changed"
        );

        let event = OutboundEvent::PresenceChanged {
            usuario_id: change.user_id,
            online: change.online,
            last_seen: change.last_seen,
        };
        fanout::broadcast(registry, &event).await;
    }
}
