//! Conversation resolver: creation with one-to-one dedup, per-viewer
//! titles, listing, and delete-for-self with last-member garbage collection

use crate::error::{AppError, AppResult};
use crate::models::conversation::{direct_key, DEFAULT_GROUP_TITLE};
use crate::models::{
    AdminSuccession, Conversation, Membership, MembershipDeletion, Message, SystemEvent,
};
use crate::services::display::DisplayNames;
use crate::services::fanout;
use crate::services::membership_service::MembershipService;
use crate::services::message_service::{MessageService, MessageView};
use crate::store::ChatStore;
use crate::websocket::events::{ConversationRef, OutboundEvent};
use crate::websocket::{ConnectionRegistry, Scope};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Messages carried by each listing entry
const PREVIEW_MESSAGES: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub id: Uuid,
    pub title: String,
    pub is_group: bool,
    pub creator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub members: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub id: Uuid,
    pub display_name: String,
    pub phone: Option<String>,
    pub active: bool,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: String,
    pub is_group: bool,
    pub creator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Whether the viewer still participates
    pub active: bool,
    pub left_at: Option<DateTime<Utc>>,
    pub members: Vec<MemberView>,
    pub last_messages: Vec<MessageView>,
    pub unread_count: i64,
}

/// Result of `create`: the detail plus whether a new row was written
#[derive(Debug, Clone)]
pub struct Resolved {
    pub detail: ConversationDetail,
    pub created: bool,
}

pub struct ConversationService;

impl ConversationService {
    /// Create a conversation, or reuse the one-to-one chat of the same pair
    pub async fn create(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        requester_id: Uuid,
        member_ids: &[Uuid],
        is_group: bool,
        title: Option<&str>,
    ) -> AppResult<Resolved> {
        let mut seen = HashSet::new();
        let members: Vec<Uuid> = std::iter::once(requester_id)
            .chain(member_ids.iter().copied())
            .filter(|id| seen.insert(*id))
            .collect();

        let known = store.get_users(&members).await?;
        if known.len() != members.len() {
            return Err(AppError::not_found("user"));
        }

        if is_group {
            let title = title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_GROUP_TITLE)
                .to_string();
            let conversation = Conversation {
                id: Uuid::new_v4(),
                title: Some(title),
                is_group: true,
                creator_id: Some(requester_id),
                direct_key: None,
                created_at: Utc::now(),
            };
            Self::insert(store, &conversation, &members).await?;
            Self::announce_created(store, registry, &conversation, &members).await;
            let detail = Self::detail_for(store, &conversation, requester_id, members).await?;
            return Ok(Resolved {
                detail,
                created: true,
            });
        }

        if members.len() != 2 {
            return Err(AppError::invalid(
                "a one-to-one conversation needs exactly one other member",
            ));
        }
        let key = direct_key(members[0], members[1]);

        if let Some(existing) = Self::reusable_direct(store, &key, &members).await? {
            tracing::debug!(conversation_id = %existing.id, "Reusing one-to-one conversation");
            let detail = Self::detail_for(store, &existing, requester_id, members).await?;
            return Ok(Resolved {
                detail,
                created: false,
            });
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            title: None,
            is_group: false,
            creator_id: Some(requester_id),
            direct_key: Some(key.clone()),
            created_at: Utc::now(),
        };
        match Self::insert(store, &conversation, &members).await {
            Ok(()) => {}
            // a concurrent request created the pair first
            Err(AppError::Conflict(_)) => {
                let winner = Self::reusable_direct(store, &key, &members)
                    .await?
                    .ok_or_else(|| AppError::Conflict("one-to-one conversation".into()))?;
                let detail = Self::detail_for(store, &winner, requester_id, members).await?;
                return Ok(Resolved {
                    detail,
                    created: false,
                });
            }
            Err(e) => return Err(e),
        }

        Self::announce_created(store, registry, &conversation, &members).await;
        let detail = Self::detail_for(store, &conversation, requester_id, members).await?;
        Ok(Resolved {
            detail,
            created: true,
        })
    }

    /// The conversation holding `key`, if it still has exactly the two
    /// members of the pair, both active; a stale key is released
    async fn reusable_direct(
        store: &dyn ChatStore,
        key: &str,
        pair: &[Uuid],
    ) -> AppResult<Option<Conversation>> {
        let existing = match store.find_direct_conversation(key).await? {
            Some(conversation) => conversation,
            None => return Ok(None),
        };
        let rows = store.list_members(existing.id).await?;
        let ids: HashSet<Uuid> = rows.iter().map(|m| m.user_id).collect();
        let qualifies = rows.len() == 2
            && rows.iter().all(|m| m.active)
            && pair.iter().all(|id| ids.contains(id));
        if qualifies {
            return Ok(Some(existing));
        }
        tracing::debug!(conversation_id = %existing.id, "Releasing stale one-to-one key");
        store.clear_direct_key(existing.id).await?;
        Ok(None)
    }

    async fn insert(
        store: &dyn ChatStore,
        conversation: &Conversation,
        members: &[Uuid],
    ) -> AppResult<()> {
        let memberships: Vec<Membership> = members
            .iter()
            .map(|id| Membership::new_active(conversation.id, *id, conversation.created_at))
            .collect();
        store.insert_conversation(conversation, &memberships).await?;
        tracing::info!(
            conversation_id = %conversation.id,
            is_group = conversation.is_group,
            members = members.len(),
            "Conversation created"
        );
        Ok(())
    }

    async fn title_for(
        store: &dyn ChatStore,
        conversation: &Conversation,
        viewer_id: Uuid,
        member_ids: &[Uuid],
    ) -> AppResult<String> {
        if conversation.is_group {
            return Ok(conversation
                .title
                .clone()
                .unwrap_or_else(|| DEFAULT_GROUP_TITLE.to_string()));
        }
        let other = member_ids.iter().copied().find(|id| *id != viewer_id);
        let names = DisplayNames::load(store, viewer_id, &other.into_iter().collect::<Vec<_>>())
            .await?;
        Ok(names.direct_title(other))
    }

    async fn detail_for(
        store: &dyn ChatStore,
        conversation: &Conversation,
        viewer_id: Uuid,
        members: Vec<Uuid>,
    ) -> AppResult<ConversationDetail> {
        let title = Self::title_for(store, conversation, viewer_id, &members).await?;
        Ok(ConversationDetail {
            id: conversation.id,
            title,
            is_group: conversation.is_group,
            creator_id: conversation.creator_id,
            created_at: conversation.created_at,
            members,
        })
    }

    /// `conversacion_creada` to every member, titled for that member
    async fn announce_created(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        conversation: &Conversation,
        members: &[Uuid],
    ) {
        let Some(creator_id) = conversation.creator_id else {
            return;
        };
        for member in members {
            let title = match Self::title_for(store, conversation, *member, members).await {
                Ok(title) => title,
                Err(e) => {
                    tracing::warn!(error = %e, member = %member, "Skipping conversacion_creada");
                    continue;
                }
            };
            let event = OutboundEvent::ConversationCreated {
                tipo: "conversacion_creada",
                creador_id: creator_id,
                conversacion: ConversationRef {
                    id: conversation.id,
                    es_grupo: conversation.is_group,
                    titulo: Some(title),
                },
            };
            fanout::emit(registry, &[Scope::User(*member)], &event, None).await;
        }
    }

    /// Hard-delete the caller's row; the last row takes the whole
    /// conversation with it
    ///
    /// A group admin deleting their row hands the seat over the same way a
    /// leave does.
    pub async fn delete_for_self(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<MembershipDeletion> {
        let conversation = store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("conversation"))?;

        let succession = MembershipService::succession_for(store, &conversation, user_id).await?;
        let records = match succession {
            AdminSuccession::Transferred(new_admin) => vec![Message::system(
                conversation_id,
                SystemEvent::AdminChanged { user_id: new_admin },
                Utc::now(),
            )],
            _ => Vec::new(),
        };

        let outcome = store
            .delete_membership(conversation_id, user_id, succession, &records)
            .await?;
        match outcome {
            MembershipDeletion::NotMember => return Err(AppError::not_found("membership")),
            MembershipDeletion::Retained { remaining } => tracing::info!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                remaining,
                succession = ?succession,
                "Conversation deleted for member"
            ),
            MembershipDeletion::Purged => tracing::info!(
                conversation_id = %conversation_id,
                "Last member left, conversation purged"
            ),
        }

        registry.unsubscribe_user(user_id, conversation_id).await;
        if let (MembershipDeletion::Retained { .. }, AdminSuccession::Transferred(new_admin)) =
            (outcome, succession)
        {
            MembershipService::announce_admin_change(store, registry, conversation_id, new_admin)
                .await;
        }
        Ok(outcome)
    }

    /// Every conversation the viewer holds a row in, most recent activity first
    pub async fn list(store: &dyn ChatStore, viewer_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();
        for (conversation, membership) in store.list_user_conversations(viewer_id).await? {
            summaries.push(Self::summarize(store, conversation, membership).await?);
        }
        summaries.sort_by_key(|s| {
            std::cmp::Reverse(
                s.last_messages
                    .last()
                    .map(|m| m.created_at)
                    .unwrap_or(s.created_at),
            )
        });
        Ok(summaries)
    }

    pub async fn get(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> AppResult<ConversationSummary> {
        let (conversation, membership) =
            MembershipService::ensure_member(store, conversation_id, viewer_id).await?;
        Self::summarize(store, conversation, membership).await
    }

    pub async fn members(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> AppResult<Vec<MemberView>> {
        let (conversation, _) =
            MembershipService::ensure_member(store, conversation_id, viewer_id).await?;
        let rows = store.list_members(conversation_id).await?;
        Self::member_views(store, &conversation, viewer_id, &rows).await
    }

    async fn member_views(
        store: &dyn ChatStore,
        conversation: &Conversation,
        viewer_id: Uuid,
        rows: &[Membership],
    ) -> AppResult<Vec<MemberView>> {
        let ids: Vec<Uuid> = rows.iter().map(|m| m.user_id).collect();
        let names = DisplayNames::load(store, viewer_id, &ids).await?;
        Ok(rows
            .iter()
            .map(|m| MemberView {
                id: m.user_id,
                display_name: names.full_name(m.user_id),
                phone: names.user(m.user_id).map(|u| u.phone.clone()),
                active: m.active,
                is_admin: conversation.is_admin(m.user_id),
                joined_at: m.joined_at,
                left_at: m.left_at,
            })
            .collect())
    }

    async fn summarize(
        store: &dyn ChatStore,
        conversation: Conversation,
        membership: Membership,
    ) -> AppResult<ConversationSummary> {
        let viewer_id = membership.user_id;
        let rows = store.list_members(conversation.id).await?;
        let ids: Vec<Uuid> = rows.iter().map(|m| m.user_id).collect();
        let title = Self::title_for(store, &conversation, viewer_id, &ids).await?;
        let members = Self::member_views(store, &conversation, viewer_id, &rows).await?;

        let mut visible = MessageService::visible_messages(store, &membership).await?;
        let preview = visible.split_off(visible.len().saturating_sub(PREVIEW_MESSAGES));
        let last_messages = MessageService::render(store, viewer_id, preview).await?;
        let unread_count = store.unread_count(conversation.id, viewer_id).await?;

        Ok(ConversationSummary {
            id: conversation.id,
            title,
            is_group: conversation.is_group,
            creator_id: conversation.creator_id,
            created_at: conversation.created_at,
            active: membership.active,
            left_at: membership.left_at,
            members,
            last_messages,
            unread_count,
        })
    }
}
