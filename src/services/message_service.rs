use crate::error::{AppError, AppResult};
use crate::metrics::MESSAGES_SENT;
use crate::models::message::DELETED_PLACEHOLDER;
use crate::models::{
    Attachment, DeleteMode, DeliveryRecord, DeliveryState, Membership, Message, MessageKind,
    Reaction,
};
use crate::services::attachment_store::AttachmentStore;
use crate::services::display::DisplayNames;
use crate::services::fanout;
use crate::services::membership_service::MembershipService;
use crate::store::ChatStore;
use crate::websocket::events::{OutboundEvent, RecipientState};
use crate::websocket::{ConnectionRegistry, Scope};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Outcome of a send: the stored message, the mentions kept and the
/// delivery rows created
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: Message,
    pub mentions: Vec<Uuid>,
    pub deliveries: Vec<DeliveryRecord>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionView {
    pub user_id: Uuid,
    pub emoji: String,
}

/// A message as one viewer sees it; system texts are rendered with the
/// viewer's own aliases
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub body: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub reply_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub mentions: Vec<Uuid>,
    pub reactions: Vec<ReactionView>,
}

pub struct MessageService;

impl MessageService {
    /// Send a text message; requires an active membership
    pub async fn send(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
        reply_to_id: Option<Uuid>,
        mentions: &[Uuid],
    ) -> AppResult<SentMessage> {
        MembershipService::ensure_active_member(store, conversation_id, sender_id).await?;

        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::invalid("message body is empty"));
        }
        if let Some(reply_to_id) = reply_to_id {
            let same_conversation = store
                .get_message(reply_to_id)
                .await?
                .map(|m| m.conversation_id == conversation_id)
                .unwrap_or(false);
            if !same_conversation {
                return Err(AppError::invalid(
                    "reply target must be a message of the same conversation",
                ));
            }
        }

        let message = Message::text(conversation_id, sender_id, body.to_string(), reply_to_id);
        Self::persist_and_fan_out(store, registry, message, mentions).await
    }

    /// Store the file through the attachment collaborator, then send it as
    /// an `attachment` message
    #[allow(clippy::too_many_arguments)]
    pub async fn send_attachment(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        attachments: &dyn AttachmentStore,
        conversation_id: Uuid,
        sender_id: Uuid,
        filename: &str,
        caption: Option<&str>,
        bytes: &[u8],
        max_bytes: usize,
    ) -> AppResult<SentMessage> {
        MembershipService::ensure_active_member(store, conversation_id, sender_id).await?;
        if bytes.is_empty() {
            return Err(AppError::invalid("attachment is empty"));
        }
        if bytes.len() > max_bytes {
            return Err(AppError::invalid("attachment is too large"));
        }

        let attachment = attachments.store(bytes, filename).await?;
        let caption = caption.map(str::trim).unwrap_or_default().to_string();
        let message =
            Message::with_attachment(conversation_id, sender_id, caption, attachment.clone());
        match Self::persist_and_fan_out(store, registry, message, &[]).await {
            Ok(sent) => Ok(sent),
            Err(e) => {
                if let Err(cleanup) = attachments.discard(&attachment).await {
                    tracing::warn!(error = %cleanup, url = %attachment.url, "Orphaned attachment");
                }
                Err(e)
            }
        }
    }

    async fn persist_and_fan_out(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        message: Message,
        requested_mentions: &[Uuid],
    ) -> AppResult<SentMessage> {
        let conversation_id = message.conversation_id;
        let sender_id = message.sender_id.unwrap_or_default();
        let members = store.list_members(conversation_id).await?;

        // mentions must point at someone holding a row in the conversation
        let member_ids: HashSet<Uuid> = members.iter().map(|m| m.user_id).collect();
        let mut seen = HashSet::new();
        let mentions: Vec<Uuid> = requested_mentions
            .iter()
            .copied()
            .filter(|id| member_ids.contains(id) && seen.insert(*id))
            .collect();

        let recipients: Vec<Uuid> = members
            .iter()
            .filter(|m| m.active && m.user_id != sender_id)
            .map(|m| m.user_id)
            .collect();
        let mut online = store.online_users(&recipients).await?;
        for recipient in &recipients {
            if registry.is_online(*recipient).await {
                online.insert(*recipient);
            }
        }

        let now = Utc::now();
        let deliveries: Vec<DeliveryRecord> = recipients
            .iter()
            .map(|recipient_id| DeliveryRecord {
                message_id: message.id,
                recipient_id: *recipient_id,
                state: DeliveryState::initial(online.contains(recipient_id)),
                updated_at: now,
            })
            .collect();

        let message = store.insert_message(&message, &mentions, &deliveries).await?;
        MESSAGES_SENT.inc();

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            recipients = recipients.len(),
            "Message stored"
        );

        let received = OutboundEvent::MessageReceived((&message).into());
        let scopes: Vec<Scope> = recipients.iter().map(|id| Scope::User(*id)).collect();
        fanout::emit(registry, &scopes, &received, None).await;

        let initial = OutboundEvent::InitialDeliveryStates {
            mensaje_id: message.id,
            conversacion_id: conversation_id,
            estados: deliveries
                .iter()
                .map(|d| RecipientState::new(d.recipient_id, d.state))
                .collect(),
        };
        fanout::emit(registry, &[Scope::User(sender_id)], &initial, None).await;

        Ok(SentMessage {
            message,
            mentions,
            deliveries,
        })
    }

    /// Messages inside the viewer's membership window, minus hidden ones
    pub async fn visible_messages(
        store: &dyn ChatStore,
        membership: &Membership,
    ) -> AppResult<Vec<Message>> {
        Ok(store
            .list_messages(membership.conversation_id, membership.user_id)
            .await?
            .into_iter()
            .filter(|m| membership.can_see(m.created_at))
            .collect())
    }

    pub async fn list_visible(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> AppResult<Vec<MessageView>> {
        let (_, membership) =
            MembershipService::ensure_member(store, conversation_id, viewer_id).await?;
        let messages = Self::visible_messages(store, &membership).await?;
        Self::render(store, viewer_id, messages).await
    }

    /// Attach mentions and reactions and render system texts for `viewer_id`
    pub async fn render(
        store: &dyn ChatStore,
        viewer_id: Uuid,
        messages: Vec<Message>,
    ) -> AppResult<Vec<MessageView>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();

        let mut mentions: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for mention in store.list_mentions(&ids).await? {
            mentions
                .entry(mention.message_id)
                .or_default()
                .push(mention.user_id);
        }
        let mut reactions: HashMap<Uuid, Vec<ReactionView>> = HashMap::new();
        for reaction in store.list_reactions(&ids).await? {
            reactions
                .entry(reaction.message_id)
                .or_default()
                .push(ReactionView {
                    user_id: reaction.user_id,
                    emoji: reaction.emoji,
                });
        }

        let subjects: Vec<Uuid> = messages
            .iter()
            .filter_map(|m| m.system_event)
            .flat_map(|e| e.subjects())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let names = DisplayNames::load(store, viewer_id, &subjects).await?;

        Ok(messages
            .into_iter()
            .map(|m| {
                let body = match m.system_event {
                    Some(event) => event.render(viewer_id, |id| names.short_name(id)),
                    None => m.body,
                };
                MessageView {
                    id: m.id,
                    conversation_id: m.conversation_id,
                    sender_id: m.sender_id,
                    body,
                    kind: m.kind,
                    attachment: m.attachment,
                    reply_to_id: m.reply_to_id,
                    created_at: m.created_at,
                    edited_at: m.edited_at,
                    deleted_at: m.deleted_at,
                    mentions: mentions.remove(&m.id).unwrap_or_default(),
                    reactions: reactions.remove(&m.id).unwrap_or_default(),
                }
            })
            .collect())
    }

    /// Only the sender may edit, and only to a non-empty body
    pub async fn edit(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        message_id: Uuid,
        editor_id: Uuid,
        new_body: &str,
    ) -> AppResult<Message> {
        let mut message = store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("message"))?;
        MembershipService::ensure_member(store, message.conversation_id, editor_id).await?;

        if message.sender_id != Some(editor_id) {
            return Err(AppError::forbidden("only the sender can edit this message"));
        }
        let body = new_body.trim();
        if body.is_empty() {
            return Err(AppError::invalid("message body is empty"));
        }
        if message.is_deleted() {
            return Err(AppError::invalid("a deleted message cannot be edited"));
        }

        let edited_at = Utc::now();
        store.update_message_body(message_id, body, edited_at).await?;
        message.body = body.to_string();
        message.edited_at = Some(edited_at);

        let event = OutboundEvent::message_edited(&message);
        Self::emit_to_conversation(store, registry, &message, &event).await;

        Ok(message)
    }

    /// `self` hides the message for the actor; `everyone` (sender only)
    /// replaces the body with a placeholder for all members
    pub async fn delete(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        message_id: Uuid,
        actor_id: Uuid,
        mode: DeleteMode,
    ) -> AppResult<()> {
        let mut message = store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("message"))?;
        MembershipService::ensure_member(store, message.conversation_id, actor_id).await?;

        match mode {
            DeleteMode::ForSelf => {
                store.hide_message(message_id, actor_id).await?;
                let event = OutboundEvent::message_deleted(&message, mode, actor_id);
                fanout::emit(registry, &[Scope::User(actor_id)], &event, None).await;
            }
            DeleteMode::ForEveryone => {
                if message.sender_id != Some(actor_id) {
                    return Err(AppError::forbidden(
                        "only the sender can delete this message for everyone",
                    ));
                }
                let deleted_at = Utc::now();
                store
                    .mark_message_deleted(message_id, DELETED_PLACEHOLDER, deleted_at)
                    .await?;
                message.body = DELETED_PLACEHOLDER.to_string();
                message.deleted_at = Some(deleted_at);

                let event = OutboundEvent::message_deleted(&message, mode, actor_id);
                Self::emit_to_conversation(store, registry, &message, &event).await;
            }
        }

        tracing::debug!(message_id = %message_id, actor_id = %actor_id, mode = mode.wire_name(), "Message deleted");
        Ok(())
    }

    /// React to a visible message; reacting again replaces the emoji
    pub async fn react(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Reaction> {
        let message = Self::visible_target(store, message_id, user_id).await?;
        let reaction = Reaction {
            message_id,
            user_id,
            emoji: Reaction::validate_emoji(emoji)?,
            created_at: Utc::now(),
        };
        store.upsert_reaction(&reaction).await?;

        let event = OutboundEvent::ReactionReceived {
            mensaje_id: message_id,
            usuario_id: user_id,
            emoji: Some(reaction.emoji.clone()),
        };
        Self::emit_to_conversation(store, registry, &message, &event).await;
        Ok(reaction)
    }

    pub async fn remove_reaction(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        let message = Self::visible_target(store, message_id, user_id).await?;
        if !store.delete_reaction(message_id, user_id).await? {
            return Err(AppError::not_found("reaction"));
        }
        let event = OutboundEvent::ReactionReceived {
            mensaje_id: message_id,
            usuario_id: user_id,
            emoji: None,
        };
        Self::emit_to_conversation(store, registry, &message, &event).await;
        Ok(())
    }

    /// Hide every message of the conversation for the caller
    pub async fn clear_for_self(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<u64> {
        MembershipService::ensure_member(store, conversation_id, user_id).await?;
        store.hide_conversation(conversation_id, user_id).await
    }

    /// Message the user may act on: active member, inside their window
    async fn visible_target(
        store: &dyn ChatStore,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Message> {
        let message = store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("message"))?;
        let (_, membership) =
            MembershipService::ensure_active_member(store, message.conversation_id, user_id)
                .await?;
        if !membership.can_see(message.created_at) {
            return Err(AppError::not_found("message"));
        }
        Ok(message)
    }

    /// Emit an update about `message` to every member allowed to see it
    async fn emit_to_conversation(
        store: &dyn ChatStore,
        registry: &ConnectionRegistry,
        message: &Message,
        event: &OutboundEvent,
    ) {
        let scopes = match store.list_members(message.conversation_id).await {
            Ok(members) => fanout::members_who_can_see(&members, message.created_at),
            Err(e) => {
                tracing::warn!(error = %e, "Member lookup failed, emitting to subscribers only");
                vec![Scope::Conversation(message.conversation_id)]
            }
        };
        fanout::emit(registry, &scopes, event, None).await;
    }
}
