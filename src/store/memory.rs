//! In-process store used by `STORE_BACKEND=memory` and the test-suite

use super::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    AdminSuccession, Call, Contact, Conversation, DeliveryRecord, DeliveryState, Departure,
    Membership, MembershipDeletion, Mention, Message, Reaction, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    contacts: HashMap<Uuid, Contact>,
    conversations: HashMap<Uuid, Conversation>,
    direct_keys: HashMap<String, Uuid>,
    memberships: HashMap<(Uuid, Uuid), Membership>,
    messages: HashMap<Uuid, Message>,
    next_seq: i64,
    hidden: HashSet<(Uuid, Uuid)>,
    mentions: HashSet<Mention>,
    reactions: HashMap<(Uuid, Uuid), Reaction>,
    deliveries: HashMap<(Uuid, Uuid), DeliveryRecord>,
    calls: HashMap<Uuid, Call>,
    call_participants: HashSet<(Uuid, Uuid)>,
}

impl Tables {
    fn push_message(&mut self, message: &Message) -> Message {
        self.next_seq += 1;
        let stored = Message {
            seq: self.next_seq,
            ..message.clone()
        };
        self.messages.insert(stored.id, stored.clone());
        stored
    }

    fn apply_succession(&mut self, conversation_id: Uuid, succession: AdminSuccession) {
        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            match succession {
                AdminSuccession::Unchanged => {}
                AdminSuccession::Transferred(user_id) => conversation.creator_id = Some(user_id),
                AdminSuccession::Orphaned => conversation.creator_id = None,
            }
        }
    }

    fn members_of(&self, conversation_id: Uuid) -> impl Iterator<Item = &Membership> {
        self.memberships
            .values()
            .filter(move |m| m.conversation_id == conversation_id)
    }

    fn message_ids_of(&self, conversation_id: Uuid) -> HashSet<Uuid> {
        self.messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.id)
            .collect()
    }

    fn purge_conversation(&mut self, conversation_id: Uuid) {
        let message_ids = self.message_ids_of(conversation_id);
        self.deliveries
            .retain(|(message_id, _), _| !message_ids.contains(message_id));
        self.hidden
            .retain(|(message_id, _)| !message_ids.contains(message_id));
        self.mentions.retain(|m| !message_ids.contains(&m.message_id));
        self.reactions
            .retain(|(message_id, _), _| !message_ids.contains(message_id));
        self.messages.retain(|id, _| !message_ids.contains(id));

        let call_ids: HashSet<Uuid> = self
            .calls
            .values()
            .filter(|c| c.conversation_id == conversation_id)
            .map(|c| c.id)
            .collect();
        self.call_participants
            .retain(|(call_id, _)| !call_ids.contains(call_id));
        self.calls.retain(|id, _| !call_ids.contains(id));

        self.memberships
            .retain(|(conv_id, _), _| *conv_id != conversation_id);
        if let Some(conversation) = self.conversations.remove(&conversation_id) {
            if let Some(key) = conversation.direct_key {
                self.direct_keys.remove(&key);
            }
        }
    }

    fn clear_direct_key(&mut self, conversation_id: Uuid) {
        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            if let Some(key) = conversation.direct_key.take() {
                self.direct_keys.remove(&key);
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn upsert_user(&self, user: &User) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let phone_taken = t
            .users
            .values()
            .any(|u| u.phone == user.phone && u.id != user.id);
        if phone_taken {
            return Err(AppError::Conflict("users_phone_key".into()));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> AppResult<Vec<User>> {
        let t = self.tables.read().await;
        Ok(user_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| t.users.get(id).cloned())
            .collect())
    }

    async fn find_user_by_phone(&self, phone: &str) -> AppResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.phone == phone).cloned())
    }

    async fn set_presence(&self, user_id: Uuid, online: bool, at: DateTime<Utc>) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if let Some(user) = t.users.get_mut(&user_id) {
            user.online = online;
            user.last_seen_at = Some(at);
        }
        Ok(())
    }

    async fn online_users(&self, user_ids: &[Uuid]) -> AppResult<HashSet<Uuid>> {
        let t = self.tables.read().await;
        Ok(user_ids
            .iter()
            .filter(|id| t.users.get(*id).map(|u| u.online).unwrap_or(false))
            .copied()
            .collect())
    }

    async fn list_contacts(&self, owner_id: Uuid) -> AppResult<Vec<Contact>> {
        let t = self.tables.read().await;
        let mut contacts: Vec<Contact> = t
            .contacts
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        contacts.sort_by_key(|c| c.created_at);
        Ok(contacts)
    }

    async fn get_contact(&self, owner_id: Uuid, target_id: Uuid) -> AppResult<Option<Contact>> {
        let t = self.tables.read().await;
        Ok(t
            .contacts
            .values()
            .find(|c| c.owner_id == owner_id && c.target_id == target_id)
            .cloned())
    }

    async fn aliases(
        &self,
        owner_id: Uuid,
        target_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, String>> {
        let t = self.tables.read().await;
        Ok(t.contacts
            .values()
            .filter(|c| c.owner_id == owner_id && target_ids.contains(&c.target_id))
            .filter_map(|c| c.alias.clone().map(|alias| (c.target_id, alias)))
            .collect())
    }

    async fn insert_contact(&self, contact: &Contact) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let duplicate = t
            .contacts
            .values()
            .any(|c| c.owner_id == contact.owner_id && c.target_id == contact.target_id);
        if duplicate {
            return Err(AppError::Conflict("uq_contacts_pair".into()));
        }
        t.contacts.insert(contact.id, contact.clone());
        Ok(())
    }

    async fn update_contact_alias(
        &self,
        owner_id: Uuid,
        contact_id: Uuid,
        alias: Option<String>,
    ) -> AppResult<Option<Contact>> {
        let mut t = self.tables.write().await;
        Ok(match t.contacts.get_mut(&contact_id) {
            Some(contact) if contact.owner_id == owner_id => {
                contact.alias = alias;
                Some(contact.clone())
            }
            _ => None,
        })
    }

    async fn delete_contact(&self, owner_id: Uuid, contact_id: Uuid) -> AppResult<bool> {
        let mut t = self.tables.write().await;
        let owned = t
            .contacts
            .get(&contact_id)
            .map(|c| c.owner_id == owner_id)
            .unwrap_or(false);
        if owned {
            t.contacts.remove(&contact_id);
        }
        Ok(owned)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned())
    }

    async fn find_direct_conversation(&self, direct_key: &str) -> AppResult<Option<Conversation>> {
        let t = self.tables.read().await;
        Ok(t
            .direct_keys
            .get(direct_key)
            .and_then(|id| t.conversations.get(id))
            .cloned())
    }

    async fn insert_conversation(
        &self,
        conversation: &Conversation,
        members: &[Membership],
    ) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if let Some(key) = &conversation.direct_key {
            if t.direct_keys.contains_key(key) {
                return Err(AppError::Conflict("uq_conversations_direct_key".into()));
            }
            t.direct_keys.insert(key.clone(), conversation.id);
        }
        t.conversations
            .insert(conversation.id, conversation.clone());
        for member in members {
            t.memberships
                .insert((member.conversation_id, member.user_id), member.clone());
        }
        Ok(())
    }

    async fn clear_direct_key(&self, conversation_id: Uuid) -> AppResult<()> {
        self.tables.write().await.clear_direct_key(conversation_id);
        Ok(())
    }

    async fn list_user_conversations(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<(Conversation, Membership)>> {
        let t = self.tables.read().await;
        let mut rows: Vec<(Conversation, Membership)> = t
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                t.conversations
                    .get(&m.conversation_id)
                    .map(|c| (c.clone(), m.clone()))
            })
            .collect();
        rows.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at));
        Ok(rows)
    }

    async fn get_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        Ok(self
            .tables
            .read()
            .await
            .memberships
            .get(&(conversation_id, user_id))
            .cloned())
    }

    async fn list_members(&self, conversation_id: Uuid) -> AppResult<Vec<Membership>> {
        let t = self.tables.read().await;
        let mut members: Vec<Membership> = t.members_of(conversation_id).cloned().collect();
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    async fn add_members(
        &self,
        conversation_id: Uuid,
        user_ids: &[Uuid],
        at: DateTime<Utc>,
        records: &[Message],
    ) -> AppResult<Vec<Message>> {
        let mut t = self.tables.write().await;
        if !t.conversations.contains_key(&conversation_id) {
            return Err(AppError::not_found("conversation"));
        }
        for user_id in user_ids {
            t.memberships
                .entry((conversation_id, *user_id))
                .and_modify(|m| {
                    m.active = true;
                    m.left_at = None;
                })
                .or_insert_with(|| Membership::new_active(conversation_id, *user_id, at));
        }
        Ok(records.iter().map(|r| t.push_message(r)).collect())
    }

    async fn record_departure(&self, departure: &Departure) -> AppResult<Vec<Message>> {
        let mut t = self.tables.write().await;
        let key = (departure.conversation_id, departure.user_id);
        match t.memberships.get_mut(&key) {
            Some(membership) => {
                membership.active = false;
                membership.left_at = Some(departure.left_at);
            }
            None => return Err(AppError::not_found("membership")),
        }
        t.apply_succession(departure.conversation_id, departure.succession);
        Ok(departure
            .records
            .iter()
            .map(|r| t.push_message(r))
            .collect())
    }

    async fn delete_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        succession: AdminSuccession,
        records: &[Message],
    ) -> AppResult<MembershipDeletion> {
        let mut t = self.tables.write().await;
        if t.memberships.remove(&(conversation_id, user_id)).is_none() {
            return Ok(MembershipDeletion::NotMember);
        }
        t.clear_direct_key(conversation_id);

        let remaining = t.members_of(conversation_id).count();
        if remaining > 0 {
            t.apply_succession(conversation_id, succession);
            for record in records {
                t.push_message(record);
            }
            return Ok(MembershipDeletion::Retained { remaining });
        }
        t.purge_conversation(conversation_id);
        Ok(MembershipDeletion::Purged)
    }

    async fn insert_message(
        &self,
        message: &Message,
        mentions: &[Uuid],
        deliveries: &[DeliveryRecord],
    ) -> AppResult<Message> {
        let mut t = self.tables.write().await;
        if !t.conversations.contains_key(&message.conversation_id) {
            return Err(AppError::not_found("conversation"));
        }
        let stored = t.push_message(message);
        for user_id in mentions {
            t.mentions.insert(Mention {
                message_id: stored.id,
                user_id: *user_id,
            });
        }
        for record in deliveries {
            t.deliveries
                .insert((record.message_id, record.recipient_id), record.clone());
        }
        Ok(stored)
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.tables.read().await.messages.get(&message_id).cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> AppResult<Vec<Message>> {
        let t = self.tables.read().await;
        let mut messages: Vec<Message> = t
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| !t.hidden.contains(&(m.id, viewer_id)))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(messages)
    }

    async fn update_message_body(
        &self,
        message_id: Uuid,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let message = t
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| AppError::not_found("message"))?;
        message.body = body.to_string();
        message.edited_at = Some(edited_at);
        Ok(())
    }

    async fn mark_message_deleted(
        &self,
        message_id: Uuid,
        placeholder: &str,
        deleted_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let message = t
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| AppError::not_found("message"))?;
        message.body = placeholder.to_string();
        message.deleted_at = Some(deleted_at);
        Ok(())
    }

    async fn hide_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.tables.write().await.hidden.insert((message_id, user_id));
        Ok(())
    }

    async fn hide_conversation(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        let mut t = self.tables.write().await;
        let ids = t.message_ids_of(conversation_id);
        let mut hidden = 0;
        for id in ids {
            if t.hidden.insert((id, user_id)) {
                hidden += 1;
            }
        }
        Ok(hidden)
    }

    async fn list_mentions(&self, message_ids: &[Uuid]) -> AppResult<Vec<Mention>> {
        let t = self.tables.read().await;
        Ok(t.mentions
            .iter()
            .filter(|m| message_ids.contains(&m.message_id))
            .copied()
            .collect())
    }

    async fn upsert_reaction(&self, reaction: &Reaction) -> AppResult<()> {
        self.tables
            .write()
            .await
            .reactions
            .insert((reaction.message_id, reaction.user_id), reaction.clone());
        Ok(())
    }

    async fn delete_reaction(&self, message_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        Ok(self
            .tables
            .write()
            .await
            .reactions
            .remove(&(message_id, user_id))
            .is_some())
    }

    async fn list_reactions(&self, message_ids: &[Uuid]) -> AppResult<Vec<Reaction>> {
        let t = self.tables.read().await;
        let mut reactions: Vec<Reaction> = t
            .reactions
            .values()
            .filter(|r| message_ids.contains(&r.message_id))
            .cloned()
            .collect();
        reactions.sort_by_key(|r| r.created_at);
        Ok(reactions)
    }

    async fn list_deliveries(&self, conversation_id: Uuid) -> AppResult<Vec<DeliveryRecord>> {
        let t = self.tables.read().await;
        let ids = t.message_ids_of(conversation_id);
        Ok(t.deliveries
            .values()
            .filter(|d| ids.contains(&d.message_id))
            .cloned()
            .collect())
    }

    async fn advance_deliveries(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        target: DeliveryState,
        at: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut t = self.tables.write().await;
        let ids = t.message_ids_of(conversation_id);
        let mut changed = 0;
        for record in t.deliveries.values_mut() {
            if record.recipient_id != recipient_id || !ids.contains(&record.message_id) {
                continue;
            }
            if let Some(next) = record.state.advance(target) {
                record.state = next;
                record.updated_at = at;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        let t = self.tables.read().await;
        let ids = t.message_ids_of(conversation_id);
        Ok(t.deliveries
            .values()
            .filter(|d| d.recipient_id == user_id && ids.contains(&d.message_id))
            .filter(|d| d.state != DeliveryState::Read)
            .count() as i64)
    }

    async fn insert_call(&self, call: &Call) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if !t.conversations.contains_key(&call.conversation_id) {
            return Err(AppError::not_found("conversation"));
        }
        t.calls.insert(call.id, call.clone());
        t.call_participants.insert((call.id, call.created_by));
        Ok(())
    }
}
