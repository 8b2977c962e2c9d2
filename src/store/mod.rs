//! Durable store seam
//!
//! Every method that touches more than one row is atomic: the postgres
//! implementation wraps it in one transaction, the in-memory one holds a
//! single write lock.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::error::AppResult;
use crate::models::{
    AdminSuccession, Call, Contact, Conversation, DeliveryRecord, DeliveryState, Departure, Membership,
    MembershipDeletion, Mention, Message, Reaction, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[async_trait]
pub trait ChatStore: Send + Sync {
    // users and presence

    /// Insert or refresh a profile row (identity sync, fixtures)
    async fn upsert_user(&self, user: &User) -> AppResult<()>;
    async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>>;
    async fn get_users(&self, user_ids: &[Uuid]) -> AppResult<Vec<User>>;
    async fn find_user_by_phone(&self, phone: &str) -> AppResult<Option<User>>;
    async fn set_presence(&self, user_id: Uuid, online: bool, at: DateTime<Utc>) -> AppResult<()>;
    async fn online_users(&self, user_ids: &[Uuid]) -> AppResult<HashSet<Uuid>>;

    // contacts

    async fn list_contacts(&self, owner_id: Uuid) -> AppResult<Vec<Contact>>;
    async fn get_contact(&self, owner_id: Uuid, target_id: Uuid) -> AppResult<Option<Contact>>;
    /// Owner's aliases for the given targets; targets without alias are absent
    async fn aliases(&self, owner_id: Uuid, target_ids: &[Uuid])
        -> AppResult<HashMap<Uuid, String>>;
    /// Fails with `Conflict` when the (owner, target) pair exists
    async fn insert_contact(&self, contact: &Contact) -> AppResult<()>;
    async fn update_contact_alias(
        &self,
        owner_id: Uuid,
        contact_id: Uuid,
        alias: Option<String>,
    ) -> AppResult<Option<Contact>>;
    async fn delete_contact(&self, owner_id: Uuid, contact_id: Uuid) -> AppResult<bool>;

    // conversations and memberships

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>>;
    async fn find_direct_conversation(&self, direct_key: &str) -> AppResult<Option<Conversation>>;
    /// Fails with `Conflict` when another conversation holds the same direct key
    async fn insert_conversation(
        &self,
        conversation: &Conversation,
        members: &[Membership],
    ) -> AppResult<()>;
    async fn clear_direct_key(&self, conversation_id: Uuid) -> AppResult<()>;
    async fn list_user_conversations(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<(Conversation, Membership)>>;
    async fn get_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>>;
    async fn list_members(&self, conversation_id: Uuid) -> AppResult<Vec<Membership>>;
    /// Reactivate-or-insert each user and persist the announcing records
    async fn add_members(
        &self,
        conversation_id: Uuid,
        user_ids: &[Uuid],
        at: DateTime<Utc>,
        records: &[Message],
    ) -> AppResult<Vec<Message>>;
    async fn record_departure(&self, departure: &Departure) -> AppResult<Vec<Message>>;
    /// Hard-delete one row; purges the conversation when it was the last,
    /// otherwise applies the admin succession and stores `records`
    async fn delete_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        succession: AdminSuccession,
        records: &[Message],
    ) -> AppResult<MembershipDeletion>;

    // messages

    /// Persist message, mentions and delivery rows together; returns the
    /// message with its store-assigned sequence
    async fn insert_message(
        &self,
        message: &Message,
        mentions: &[Uuid],
        deliveries: &[DeliveryRecord],
    ) -> AppResult<Message>;
    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<Message>>;
    /// Messages not hidden for `viewer_id`, ordered by creation then sequence
    async fn list_messages(&self, conversation_id: Uuid, viewer_id: Uuid)
        -> AppResult<Vec<Message>>;
    async fn update_message_body(
        &self,
        message_id: Uuid,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<()>;
    async fn mark_message_deleted(
        &self,
        message_id: Uuid,
        placeholder: &str,
        deleted_at: DateTime<Utc>,
    ) -> AppResult<()>;
    /// Idempotent
    async fn hide_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()>;
    async fn hide_conversation(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64>;
    async fn list_mentions(&self, message_ids: &[Uuid]) -> AppResult<Vec<Mention>>;
    /// Insert, or replace the emoji of the user's existing reaction
    async fn upsert_reaction(&self, reaction: &Reaction) -> AppResult<()>;
    async fn delete_reaction(&self, message_id: Uuid, user_id: Uuid) -> AppResult<bool>;
    async fn list_reactions(&self, message_ids: &[Uuid]) -> AppResult<Vec<Reaction>>;

    // delivery states

    async fn list_deliveries(&self, conversation_id: Uuid) -> AppResult<Vec<DeliveryRecord>>;
    /// Move every row of `recipient_id` in the conversation that is behind
    /// `target` up to it; returns the number of rows changed
    async fn advance_deliveries(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        target: DeliveryState,
        at: DateTime<Utc>,
    ) -> AppResult<u64>;
    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64>;

    // calls

    /// Persist the call with its creator as first participant
    async fn insert_call(&self, call: &Call) -> AppResult<()>;
}
