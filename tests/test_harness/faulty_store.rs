//! In-memory store with switchable faults
//!
//! Delegates to `InMemoryStore`; the knobs let a test land on branches
//! that only a racing request or a failing database reach.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use realtime_messaging_service::{
    error::{AppError, AppResult},
    models::{
        AdminSuccession, Call, Contact, Conversation, DeliveryRecord, DeliveryState, Departure,
        Membership, MembershipDeletion, Mention, Message, Reaction, User,
    },
    store::{memory::InMemoryStore, ChatStore},
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    missed_direct_lookups: AtomicUsize,
    fail_message_inserts: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` one-to-one lookups report nothing, as if another
    /// request had not committed yet
    pub fn miss_direct_lookups(&self, count: usize) {
        self.missed_direct_lookups.store(count, Ordering::SeqCst);
    }

    pub fn fail_message_inserts(&self, fail: bool) {
        self.fail_message_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatStore for FaultyStore {
    async fn upsert_user(&self, user: &User) -> AppResult<()> {
        self.inner.upsert_user(user).await
    }

    async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        self.inner.get_user(user_id).await
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> AppResult<Vec<User>> {
        self.inner.get_users(user_ids).await
    }

    async fn find_user_by_phone(&self, phone: &str) -> AppResult<Option<User>> {
        self.inner.find_user_by_phone(phone).await
    }

    async fn set_presence(&self, user_id: Uuid, online: bool, at: DateTime<Utc>) -> AppResult<()> {
        self.inner.set_presence(user_id, online, at).await
    }

    async fn online_users(&self, user_ids: &[Uuid]) -> AppResult<HashSet<Uuid>> {
        self.inner.online_users(user_ids).await
    }

    async fn list_contacts(&self, owner_id: Uuid) -> AppResult<Vec<Contact>> {
        self.inner.list_contacts(owner_id).await
    }

    async fn get_contact(&self, owner_id: Uuid, target_id: Uuid) -> AppResult<Option<Contact>> {
        self.inner.get_contact(owner_id, target_id).await
    }

    async fn aliases(
        &self,
        owner_id: Uuid,
        target_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, String>> {
        self.inner.aliases(owner_id, target_ids).await
    }

    async fn insert_contact(&self, contact: &Contact) -> AppResult<()> {
        self.inner.insert_contact(contact).await
    }

    async fn update_contact_alias(
        &self,
        owner_id: Uuid,
        contact_id: Uuid,
        alias: Option<String>,
    ) -> AppResult<Option<Contact>> {
        self.inner
            .update_contact_alias(owner_id, contact_id, alias)
            .await
    }

    async fn delete_contact(&self, owner_id: Uuid, contact_id: Uuid) -> AppResult<bool> {
        self.inner.delete_contact(owner_id, contact_id).await
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn find_direct_conversation(&self, direct_key: &str) -> AppResult<Option<Conversation>> {
        let missed = self
            .missed_direct_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return Ok(None);
        }
        self.inner.find_direct_conversation(direct_key).await
    }

    async fn insert_conversation(
        &self,
        conversation: &Conversation,
        members: &[Membership],
    ) -> AppResult<()> {
        self.inner.insert_conversation(conversation, members).await
    }

    async fn clear_direct_key(&self, conversation_id: Uuid) -> AppResult<()> {
        self.inner.clear_direct_key(conversation_id).await
    }

    async fn list_user_conversations(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<(Conversation, Membership)>> {
        self.inner.list_user_conversations(user_id).await
    }

    async fn get_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        self.inner.get_membership(conversation_id, user_id).await
    }

    async fn list_members(&self, conversation_id: Uuid) -> AppResult<Vec<Membership>> {
        self.inner.list_members(conversation_id).await
    }

    async fn add_members(
        &self,
        conversation_id: Uuid,
        user_ids: &[Uuid],
        at: DateTime<Utc>,
        records: &[Message],
    ) -> AppResult<Vec<Message>> {
        self.inner
            .add_members(conversation_id, user_ids, at, records)
            .await
    }

    async fn record_departure(&self, departure: &Departure) -> AppResult<Vec<Message>> {
        self.inner.record_departure(departure).await
    }

    async fn delete_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        succession: AdminSuccession,
        records: &[Message],
    ) -> AppResult<MembershipDeletion> {
        self.inner
            .delete_membership(conversation_id, user_id, succession, records)
            .await
    }

    async fn insert_message(
        &self,
        message: &Message,
        mentions: &[Uuid],
        deliveries: &[DeliveryRecord],
    ) -> AppResult<Message> {
        if self.fail_message_inserts.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("database went away".into()));
        }
        self.inner.insert_message(message, mentions, deliveries).await
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        self.inner.get_message(message_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> AppResult<Vec<Message>> {
        self.inner.list_messages(conversation_id, viewer_id).await
    }

    async fn update_message_body(
        &self,
        message_id: Uuid,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.inner
            .update_message_body(message_id, body, edited_at)
            .await
    }

    async fn mark_message_deleted(
        &self,
        message_id: Uuid,
        placeholder: &str,
        deleted_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.inner
            .mark_message_deleted(message_id, placeholder, deleted_at)
            .await
    }

    async fn hide_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.inner.hide_message(message_id, user_id).await
    }

    async fn hide_conversation(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        self.inner.hide_conversation(conversation_id, user_id).await
    }

    async fn list_mentions(&self, message_ids: &[Uuid]) -> AppResult<Vec<Mention>> {
        self.inner.list_mentions(message_ids).await
    }

    async fn upsert_reaction(&self, reaction: &Reaction) -> AppResult<()> {
        self.inner.upsert_reaction(reaction).await
    }

    async fn delete_reaction(&self, message_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        self.inner.delete_reaction(message_id, user_id).await
    }

    async fn list_reactions(&self, message_ids: &[Uuid]) -> AppResult<Vec<Reaction>> {
        self.inner.list_reactions(message_ids).await
    }

    async fn list_deliveries(&self, conversation_id: Uuid) -> AppResult<Vec<DeliveryRecord>> {
        self.inner.list_deliveries(conversation_id).await
    }

    async fn advance_deliveries(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        target: DeliveryState,
        at: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.inner
            .advance_deliveries(conversation_id, recipient_id, target, at)
            .await
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        self.inner.unread_count(conversation_id, user_id).await
    }

    async fn insert_call(&self, call: &Call) -> AppResult<()> {
        self.inner.insert_call(call).await
    }
}
