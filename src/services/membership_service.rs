//! Membership ledger: who belongs to a conversation, since when, and
//! whether they may still act on it

use crate::error::{AppError, AppResult};
use crate::models::{
    AdminSuccession, Conversation, Departure, Membership, Message, SystemEvent,
};
use crate::services::display::DisplayNames;
use crate::services::fanout;
use crate::store::ChatStore;
use crate::websocket::events::OutboundEvent;
use crate::websocket::{ConnectionRegistry, Scope};
use chrono::Utc;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use uuid::Uuid;

pub struct MembershipService;

impl MembershipService {
    /// Conversation must exist and the user must hold a row, active or not
    pub async fn ensure_member(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<(Conversation, Membership)> {
        let conversation = store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("conversation"))?;
        let membership = store
            .get_membership(conversation_id, user_id)
            .await?
            .ok_or_else(|| AppError::forbidden("not a member of this conversation"))?;
        Ok((conversation, membership))
    }

    /// Like `ensure_member`, but inactive rows only grant history access
    pub async fn ensure_active_member(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<(Conversation, Membership)> {
        let (conversation, membership) =
            Self::ensure_member(store, conversation_id, user_id).await?;
        if !membership.active {
            return Err(AppError::forbidden("no longer a member of this conversation"));
        }
        Ok((conversation, membership))
    }

    /// Admin adds users to a group; inactive rows are reactivated
    ///
    /// Returns the users that were not active before.
    pub async fn add_members(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_ids: &[Uuid],
    ) -> AppResult<Vec<Uuid>> {
        let (conversation, membership) =
            Self::ensure_member(store, conversation_id, actor_id).await?;
        if !conversation.is_group {
            return Err(AppError::invalid("members can only be added to groups"));
        }
        if !membership.active || !conversation.is_admin(actor_id) {
            return Err(AppError::forbidden("only the admin can add members"));
        }

        let mut seen = HashSet::new();
        let requested: Vec<Uuid> = user_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if requested.is_empty() {
            return Err(AppError::invalid("members list is empty"));
        }
        let known = store.get_users(&requested).await?;
        if known.len() != requested.len() {
            return Err(AppError::not_found("user"));
        }

        let active: HashSet<Uuid> = store
            .list_members(conversation_id)
            .await?
            .into_iter()
            .filter(|m| m.active)
            .map(|m| m.user_id)
            .collect();
        let added: Vec<Uuid> = requested
            .into_iter()
            .filter(|id| !active.contains(id))
            .collect();
        if added.is_empty() {
            return Ok(added);
        }

        let at = Utc::now();
        let records: Vec<Message> = added
            .iter()
            .map(|user_id| {
                Message::system(
                    conversation_id,
                    SystemEvent::MemberAdded {
                        actor_id,
                        user_id: *user_id,
                    },
                    at,
                )
            })
            .collect();
        store
            .add_members(conversation_id, &added, at, &records)
            .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            actor_id = %actor_id,
            added = added.len(),
            "Members added"
        );

        Self::announce_added(store, registry, &conversation, actor_id, &added).await;
        Ok(added)
    }

    async fn announce_added(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        conversation: &Conversation,
        actor_id: Uuid,
        added: &[Uuid],
    ) {
        let mut subjects = vec![actor_id];
        subjects.extend_from_slice(added);

        for viewer in registry.conversation_viewers(conversation.id).await {
            let names = match DisplayNames::load(store, viewer, &subjects).await {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(error = %e, viewer = %viewer, "Skipping miembro_agregado");
                    continue;
                }
            };
            for user_id in added {
                let event = OutboundEvent::MemberAdded {
                    conversacion_id: conversation.id,
                    nuevo_id: *user_id,
                    admin_id: actor_id,
                    admin_visible: names.short_name(actor_id),
                    nuevo_visible: names.short_name(*user_id),
                };
                fanout::emit_to_viewer(registry, conversation.id, viewer, &event).await;
            }
        }

        for user_id in added {
            let event = OutboundEvent::NewChat {
                id: conversation.id,
                titulo: conversation.title.clone(),
                es_grupo: true,
            };
            fanout::emit(registry, &[Scope::User(*user_id)], &event, None).await;
        }
    }

    /// Self-leave, or removal of another member by the admin
    ///
    /// When the admin leaves, an active member chosen uniformly at random
    /// takes over; with nobody left the group has no admin.
    pub async fn remove_member(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        conversation_id: Uuid,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> AppResult<AdminSuccession> {
        let conversation = store
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.is_group)
            .ok_or_else(|| AppError::not_found("group"))?;
        Self::ensure_member(store, conversation_id, actor_id).await?;

        let own_exit = actor_id == target_id;
        if !own_exit && !conversation.is_admin(actor_id) {
            return Err(AppError::forbidden("only the admin can remove members"));
        }
        let target = store
            .get_membership(conversation_id, target_id)
            .await?
            .ok_or_else(|| AppError::not_found("member"))?;
        if !own_exit && conversation.is_admin(target_id) {
            return Err(AppError::forbidden("the admin can only leave voluntarily"));
        }
        if !target.active {
            return Ok(AdminSuccession::Unchanged);
        }

        let succession = Self::succession_for(store, &conversation, target_id).await?;

        // stamped with left_at so the leaver's window still includes them
        let left_at = Utc::now();
        let event = if own_exit {
            SystemEvent::MemberLeft { user_id: target_id }
        } else {
            SystemEvent::MemberRemoved {
                actor_id,
                user_id: target_id,
            }
        };
        let mut records = vec![Message::system(conversation_id, event, left_at)];
        if let AdminSuccession::Transferred(user_id) = succession {
            records.push(Message::system(
                conversation_id,
                SystemEvent::AdminChanged { user_id },
                left_at,
            ));
        }

        store
            .record_departure(&Departure {
                conversation_id,
                user_id: target_id,
                left_at,
                succession,
                records,
            })
            .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            actor_id = %actor_id,
            target_id = %target_id,
            succession = ?succession,
            "Member departed"
        );

        Self::announce_departure(store, registry, conversation_id, actor_id, target_id, succession)
            .await;
        registry.unsubscribe_user(target_id, conversation_id).await;
        Ok(succession)
    }

    /// Admin seat outcome when `departing` leaves the group: a random
    /// active member takes over, or nobody when none remains
    pub(crate) async fn succession_for(
        store: &dyn ChatStore,
        conversation: &Conversation,
        departing: Uuid,
    ) -> AppResult<AdminSuccession> {
        if !conversation.is_group || !conversation.is_admin(departing) {
            return Ok(AdminSuccession::Unchanged);
        }
        let candidates: Vec<Uuid> = store
            .list_members(conversation.id)
            .await?
            .into_iter()
            .filter(|m| m.active && m.user_id != departing)
            .map(|m| m.user_id)
            .collect();
        Ok(match candidates.choose(&mut rand::thread_rng()) {
            Some(user_id) => AdminSuccession::Transferred(*user_id),
            None => AdminSuccession::Orphaned,
        })
    }

    /// `nuevo_admin_grupo` for every subscribed viewer, named in their aliases
    pub(crate) async fn announce_admin_change(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        conversation_id: Uuid,
        new_admin: Uuid,
    ) {
        for viewer in registry.conversation_viewers(conversation_id).await {
            let nombre = match DisplayNames::load(store, viewer, &[new_admin]).await {
                Ok(names) => names.short_name(new_admin),
                Err(e) => {
                    tracing::warn!(error = %e, viewer = %viewer, "Skipping nuevo_admin_grupo");
                    continue;
                }
            };
            let changed = OutboundEvent::AdminChanged {
                conversacion_id: conversation_id,
                nuevo_admin_id: new_admin,
                nombre,
            };
            fanout::emit_to_viewer(registry, conversation_id, viewer, &changed).await;
        }
    }

    async fn announce_departure(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        conversation_id: Uuid,
        actor_id: Uuid,
        target_id: Uuid,
        succession: AdminSuccession,
    ) {
        let new_admin = match succession {
            AdminSuccession::Transferred(user_id) => Some(user_id),
            _ => None,
        };
        let mut subjects = vec![actor_id, target_id];
        subjects.extend(new_admin);

        for viewer in registry.conversation_viewers(conversation_id).await {
            let names = match DisplayNames::load(store, viewer, &subjects).await {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(error = %e, viewer = %viewer, "Skipping usuario_salio_grupo");
                    continue;
                }
            };
            let left = OutboundEvent::MemberLeft {
                conversacion_id: conversation_id,
                usuario_id: target_id,
                nombre_salida: names.short_name(target_id),
                actor_id,
                actor_nombre: names.short_name(actor_id),
                es_salida_propia: actor_id == target_id,
                nuevo_admin_id: new_admin,
            };
            fanout::emit_to_viewer(registry, conversation_id, viewer, &left).await;

            if let Some(new_admin) = new_admin {
                let changed = OutboundEvent::AdminChanged {
                    conversacion_id: conversation_id,
                    nuevo_admin_id: new_admin,
                    nombre: names.short_name(new_admin),
                };
                fanout::emit_to_viewer(registry, conversation_id, viewer, &changed).await;
            }
        }
    }
}
