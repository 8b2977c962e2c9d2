//! Inbound realtime event handling
//!
//! The authenticated user of the connection is the only identity trusted;
//! any `from`/`usuario_id` supplied by the client is overwritten.

use crate::error::AppResult;
use crate::services::display::DisplayNames;
use crate::services::fanout;
use crate::services::membership_service::MembershipService;
use crate::services::presence_service::PresenceService;
use crate::state::AppState;
use crate::websocket::events::{OutboundEvent, RtcPeer};
use crate::websocket::message_types::InboundEvent;
use crate::websocket::{ConnectionId, Scope};
use serde_json::{Map, Value};
use uuid::Uuid;

pub async fn handle_inbound(
    state: &AppState,
    connection: ConnectionId,
    user_id: Uuid,
    event: InboundEvent,
) -> AppResult<()> {
    let store = state.store.as_ref();
    let registry = &state.registry;

    match event {
        InboundEvent::RegisterUser { usuario_id } => {
            if usuario_id.is_some_and(|claimed| claimed != user_id) {
                tracing::warn!(
                    user_id = %user_id,
                    claimed = ?usuario_id,
                    "registrar_usuario for another user ignored"
                );
                return Ok(());
            }
            PresenceService::register(store, registry, connection).await;
        }

        InboundEvent::Subscribe { conversacion_id } => {
            MembershipService::ensure_active_member(store, conversacion_id, user_id).await?;
            registry.subscribe(connection, conversacion_id).await;
            tracing::debug!(user_id = %user_id, conversation_id = %conversacion_id, "Subscribed");
        }

        InboundEvent::Typing {
            conversacion_id,
            mut rest,
        } => {
            MembershipService::ensure_active_member(store, conversacion_id, user_id).await?;
            rest.insert("conversacion_id".into(), Value::String(conversacion_id.to_string()));
            rest.insert("usuario_id".into(), Value::String(user_id.to_string()));
            let event = OutboundEvent::Typing(Value::Object(rest));
            fanout::emit(
                registry,
                &[Scope::Conversation(conversacion_id)],
                &event,
                Some(connection),
            )
            .await;
        }

        InboundEvent::IncomingCall {
            conversacion_id,
            to,
            tipo,
            foto,
        } => {
            MembershipService::ensure_active_member(store, conversacion_id, user_id).await?;
            // caller's name as the callee knows it
            let names = DisplayNames::load(store, to, &[user_id]).await?;
            let event = OutboundEvent::IncomingCall {
                conversacion_id,
                from: user_id,
                to,
                tipo,
                foto,
                nombre: names.short_name(user_id),
            };
            let delivered = fanout::emit(
                registry,
                &[Scope::User(to), Scope::Conversation(conversacion_id)],
                &event,
                Some(connection),
            )
            .await;
            tracing::debug!(from = %user_id, to = %to, delivered, "incoming_call relayed");
        }

        InboundEvent::RtcJoin { conversacion_id } => {
            MembershipService::ensure_active_member(store, conversacion_id, user_id).await?;
            registry.subscribe(connection, conversacion_id).await;
            let peer = RtcPeer {
                conversacion_id,
                user_id,
            };
            let scope = [Scope::Conversation(conversacion_id)];
            fanout::emit(registry, &scope, &OutboundEvent::RtcPeerJoined(peer.clone()), Some(connection))
                .await;
            fanout::emit(registry, &scope, &OutboundEvent::RtcUserJoined(peer), Some(connection))
                .await;
        }

        InboundEvent::RtcLeave { conversacion_id } => {
            let event = OutboundEvent::RtcUserLeft(RtcPeer {
                conversacion_id,
                user_id,
            });
            fanout::emit(
                registry,
                &[Scope::Conversation(conversacion_id)],
                &event,
                Some(connection),
            )
            .await;
        }

        InboundEvent::RtcOffer { to, rest } => {
            relay(state, user_id, to, rest, OutboundEvent::RtcOffer).await;
        }
        InboundEvent::RtcAnswer { to, rest } => {
            relay(state, user_id, to, rest, OutboundEvent::RtcAnswer).await;
        }
        InboundEvent::RtcIceCandidate { to, rest } => {
            relay(state, user_id, to, rest, OutboundEvent::RtcIceCandidate).await;
        }
    }
    Ok(())
}

/// Point-to-point signal; dropped when the target has no live connection
async fn relay(
    state: &AppState,
    from: Uuid,
    to: Uuid,
    mut payload: Map<String, Value>,
    wrap: fn(Value) -> OutboundEvent,
) {
    payload.insert("to".into(), Value::String(to.to_string()));
    payload.insert("from".into(), Value::String(from.to_string()));
    let delivered = fanout::emit(
        &state.registry,
        &[Scope::User(to)],
        &wrap(Value::Object(payload)),
        None,
    )
    .await;
    if delivered == 0 {
        tracing::debug!(from = %from, to = %to, "Signal dropped, target not connected");
    }
}
