//! PostgreSQL store over deadpool-postgres
//!
//! Connection acquisition goes through a bounded retry; every multi-row
//! write runs in one transaction.

use super::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    AdminSuccession, Attachment, Call, Contact, Conversation, DeliveryRecord, DeliveryState,
    Departure, Membership, MembershipDeletion, Mention, Message, MessageKind, Reaction,
    SystemEvent, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool, PoolError, Transaction};
use resilience::{with_retry, RetryConfig, RetryError};
use std::collections::{HashMap, HashSet};
use tokio_postgres::types::Json;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, phone, first_name, last_name, avatar_url, online, last_seen_at";
const CONTACT_COLUMNS: &str = "id, owner_id, target_id, alias, created_at";
const CONVERSATION_COLUMNS: &str = "c.id, c.title, c.is_group, c.creator_id, c.direct_key, c.created_at";
const MEMBER_COLUMNS: &str = "cm.conversation_id, cm.user_id, cm.active, cm.joined_at, cm.left_at";
const MESSAGE_COLUMNS: &str = "m.id, m.seq, m.conversation_id, m.sender_id, m.body, m.kind, \
     m.system_event, m.attachment_url, m.attachment_category, m.attachment_size, \
     m.attachment_file_name, m.reply_to_id, m.created_at, m.edited_at, m.deleted_at";

pub struct PgStore {
    pool: Pool,
    retry: RetryConfig,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            retry: RetryConfig::default(),
        }
    }

    /// Pooled connection; transient pool failures are retried, exhaustion
    /// surfaces as `ServiceUnavailable`
    async fn client(&self) -> AppResult<Object> {
        let pool = &self.pool;
        with_retry(&self.retry, move || pool.get(), is_transient)
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, last } => AppError::ServiceUnavailable(format!(
                    "database unreachable after {attempts} attempts: {last}"
                )),
                RetryError::Permanent(e) => AppError::from(e),
            })
    }
}

fn is_transient(e: &PoolError) -> bool {
    matches!(e, PoolError::Timeout(_) | PoolError::Backend(_))
}

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get("id"),
        phone: row.get("phone"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        avatar_url: row.get("avatar_url"),
        online: row.get("online"),
        last_seen_at: row.get("last_seen_at"),
    }
}

fn contact_from_row(row: &Row) -> Contact {
    Contact {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        target_id: row.get("target_id"),
        alias: row.get("alias"),
        created_at: row.get("created_at"),
    }
}

fn conversation_from_row(row: &Row) -> Conversation {
    Conversation {
        id: row.get("id"),
        title: row.get("title"),
        is_group: row.get("is_group"),
        creator_id: row.get("creator_id"),
        direct_key: row.get("direct_key"),
        created_at: row.get("created_at"),
    }
}

fn membership_from_row(row: &Row) -> Membership {
    Membership {
        conversation_id: row.get("conversation_id"),
        user_id: row.get("user_id"),
        active: row.get("active"),
        joined_at: row.get("joined_at"),
        left_at: row.get("left_at"),
    }
}

fn message_from_row(row: &Row) -> AppResult<Message> {
    let kind: String = row.get("kind");
    let kind = MessageKind::from_db(&kind)
        .ok_or_else(|| AppError::Database(format!("unknown message kind '{kind}'")))?;
    let system_event: Option<Json<SystemEvent>> = row.get("system_event");
    let attachment_url: Option<String> = row.get("attachment_url");
    let attachment = attachment_url.map(|url| Attachment {
        url,
        category: row
            .get::<_, Option<String>>("attachment_category")
            .unwrap_or_default(),
        size: row.get::<_, Option<i64>>("attachment_size").unwrap_or(0),
        file_name: row
            .get::<_, Option<String>>("attachment_file_name")
            .unwrap_or_default(),
    });

    Ok(Message {
        id: row.get("id"),
        seq: row.get("seq"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        body: row.get("body"),
        kind,
        system_event: system_event.map(|Json(event)| event),
        attachment,
        reply_to_id: row.get("reply_to_id"),
        created_at: row.get("created_at"),
        edited_at: row.get("edited_at"),
        deleted_at: row.get("deleted_at"),
    })
}

fn delivery_from_row(row: &Row) -> AppResult<DeliveryRecord> {
    let state: String = row.get("state");
    Ok(DeliveryRecord {
        message_id: row.get("message_id"),
        recipient_id: row.get("recipient_id"),
        state: DeliveryState::from_db(&state)
            .ok_or_else(|| AppError::Database(format!("unknown delivery state '{state}'")))?,
        updated_at: row.get("updated_at"),
    })
}

/// Insert one message row and return its sequence number
async fn insert_message_row(tx: &Transaction<'_>, message: &Message) -> AppResult<i64> {
    let attachment = message.attachment.as_ref();
    let row = tx
        .query_one(
            "INSERT INTO messages (id, conversation_id, sender_id, body, kind, system_event, \
             attachment_url, attachment_category, attachment_size, attachment_file_name, \
             reply_to_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING seq",
            &[
                &message.id,
                &message.conversation_id,
                &message.sender_id,
                &message.body,
                &message.kind.to_db(),
                &message.system_event.map(Json),
                &attachment.map(|a| a.url.as_str()),
                &attachment.map(|a| a.category.as_str()),
                &attachment.map(|a| a.size),
                &attachment.map(|a| a.file_name.as_str()),
                &message.reply_to_id,
                &message.created_at,
            ],
        )
        .await?;
    Ok(row.get("seq"))
}

async fn insert_records(tx: &Transaction<'_>, records: &[Message]) -> AppResult<Vec<Message>> {
    let mut stored = Vec::with_capacity(records.len());
    for record in records {
        let seq = insert_message_row(tx, record).await?;
        stored.push(Message {
            seq,
            ..record.clone()
        });
    }
    Ok(stored)
}

async fn apply_succession(
    tx: &Transaction<'_>,
    conversation_id: Uuid,
    succession: AdminSuccession,
) -> AppResult<()> {
    let creator_id = match succession {
        AdminSuccession::Unchanged => return Ok(()),
        AdminSuccession::Transferred(user_id) => Some(user_id),
        AdminSuccession::Orphaned => None,
    };
    tx.execute(
        "UPDATE conversations SET creator_id = $2 WHERE id = $1",
        &[&conversation_id, &creator_id],
    )
    .await?;
    Ok(())
}

#[async_trait]
impl ChatStore for PgStore {
    async fn upsert_user(&self, user: &User) -> AppResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO users (id, phone, first_name, last_name, avatar_url, online, last_seen_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (id) DO UPDATE SET phone = EXCLUDED.phone, \
                 first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name, \
                 avatar_url = EXCLUDED.avatar_url",
                &[
                    &user.id,
                    &user.phone,
                    &user.first_name,
                    &user.last_name,
                    &user.avatar_url,
                    &user.online,
                    &user.last_seen_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let client = self.client().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = client.query_opt(sql.as_str(), &[&user_id]).await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> AppResult<Vec<User>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)");
        let rows = client.query(sql.as_str(), &[&user_ids]).await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn find_user_by_phone(&self, phone: &str) -> AppResult<Option<User>> {
        let client = self.client().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE phone = $1");
        let row = client.query_opt(sql.as_str(), &[&phone]).await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn set_presence(&self, user_id: Uuid, online: bool, at: DateTime<Utc>) -> AppResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE users SET online = $2, last_seen_at = $3 WHERE id = $1",
                &[&user_id, &online, &at],
            )
            .await?;
        Ok(())
    }

    async fn online_users(&self, user_ids: &[Uuid]) -> AppResult<HashSet<Uuid>> {
        if user_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id FROM users WHERE id = ANY($1) AND online",
                &[&user_ids],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn list_contacts(&self, owner_id: Uuid) -> AppResult<Vec<Contact>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE owner_id = $1 ORDER BY created_at"
        );
        let rows = client.query(sql.as_str(), &[&owner_id]).await?;
        Ok(rows.iter().map(contact_from_row).collect())
    }

    async fn get_contact(&self, owner_id: Uuid, target_id: Uuid) -> AppResult<Option<Contact>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE owner_id = $1 AND target_id = $2"
        );
        let row = client
            .query_opt(sql.as_str(), &[&owner_id, &target_id])
            .await?;
        Ok(row.as_ref().map(contact_from_row))
    }

    async fn aliases(
        &self,
        owner_id: Uuid,
        target_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, String>> {
        if target_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT target_id, alias FROM contacts \
                 WHERE owner_id = $1 AND target_id = ANY($2) AND alias IS NOT NULL",
                &[&owner_id, &target_ids],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("target_id"), r.get("alias")))
            .collect())
    }

    async fn insert_contact(&self, contact: &Contact) -> AppResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO contacts (id, owner_id, target_id, alias, created_at) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &contact.id,
                    &contact.owner_id,
                    &contact.target_id,
                    &contact.alias,
                    &contact.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_contact_alias(
        &self,
        owner_id: Uuid,
        contact_id: Uuid,
        alias: Option<String>,
    ) -> AppResult<Option<Contact>> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE contacts SET alias = $3 WHERE id = $1 AND owner_id = $2 \
             RETURNING {CONTACT_COLUMNS}"
        );
        let row = client
            .query_opt(sql.as_str(), &[&contact_id, &owner_id, &alias])
            .await?;
        Ok(row.as_ref().map(contact_from_row))
    }

    async fn delete_contact(&self, owner_id: Uuid, contact_id: Uuid) -> AppResult<bool> {
        let client = self.client().await?;
        let deleted = client
            .execute(
                "DELETE FROM contacts WHERE id = $1 AND owner_id = $2",
                &[&contact_id, &owner_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        let client = self.client().await?;
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = $1");
        let row = client.query_opt(sql.as_str(), &[&conversation_id]).await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn find_direct_conversation(&self, direct_key: &str) -> AppResult<Option<Conversation>> {
        let client = self.client().await?;
        let sql =
            format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.direct_key = $1");
        let row = client.query_opt(sql.as_str(), &[&direct_key]).await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn insert_conversation(
        &self,
        conversation: &Conversation,
        members: &[Membership],
    ) -> AppResult<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        tx.execute(
            "INSERT INTO conversations (id, title, is_group, creator_id, direct_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &conversation.id,
                &conversation.title,
                &conversation.is_group,
                &conversation.creator_id,
                &conversation.direct_key,
                &conversation.created_at,
            ],
        )
        .await?;

        for member in members {
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, user_id, active, joined_at, left_at) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &member.conversation_id,
                    &member.user_id,
                    &member.active,
                    &member.joined_at,
                    &member.left_at,
                ],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear_direct_key(&self, conversation_id: Uuid) -> AppResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE conversations SET direct_key = NULL WHERE id = $1",
                &[&conversation_id],
            )
            .await?;
        Ok(())
    }

    async fn list_user_conversations(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<(Conversation, Membership)>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS}, {MEMBER_COLUMNS} \
             FROM conversation_members cm \
             JOIN conversations c ON c.id = cm.conversation_id \
             WHERE cm.user_id = $1 \
             ORDER BY c.created_at DESC"
        );
        let rows = client.query(sql.as_str(), &[&user_id]).await?;
        Ok(rows
            .iter()
            .map(|row| (conversation_from_row(row), membership_from_row(row)))
            .collect())
    }

    async fn get_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM conversation_members cm \
             WHERE cm.conversation_id = $1 AND cm.user_id = $2"
        );
        let row = client
            .query_opt(sql.as_str(), &[&conversation_id, &user_id])
            .await?;
        Ok(row.as_ref().map(membership_from_row))
    }

    async fn list_members(&self, conversation_id: Uuid) -> AppResult<Vec<Membership>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM conversation_members cm \
             WHERE cm.conversation_id = $1 ORDER BY cm.joined_at"
        );
        let rows = client.query(sql.as_str(), &[&conversation_id]).await?;
        Ok(rows.iter().map(membership_from_row).collect())
    }

    async fn add_members(
        &self,
        conversation_id: Uuid,
        user_ids: &[Uuid],
        at: DateTime<Utc>,
        records: &[Message],
    ) -> AppResult<Vec<Message>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let locked = tx
            .query_opt(
                "SELECT id FROM conversations WHERE id = $1 FOR UPDATE",
                &[&conversation_id],
            )
            .await?;
        if locked.is_none() {
            return Err(AppError::not_found("conversation"));
        }

        for user_id in user_ids {
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, user_id, active, joined_at) \
                 VALUES ($1, $2, TRUE, $3) \
                 ON CONFLICT (conversation_id, user_id) \
                 DO UPDATE SET active = TRUE, left_at = NULL",
                &[&conversation_id, user_id, &at],
            )
            .await?;
        }

        let stored = insert_records(&tx, records).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn record_departure(&self, departure: &Departure) -> AppResult<Vec<Message>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        tx.query_opt(
            "SELECT id FROM conversations WHERE id = $1 FOR UPDATE",
            &[&departure.conversation_id],
        )
        .await?;

        let updated = tx
            .execute(
                "UPDATE conversation_members SET active = FALSE, left_at = $3 \
                 WHERE conversation_id = $1 AND user_id = $2",
                &[
                    &departure.conversation_id,
                    &departure.user_id,
                    &departure.left_at,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::not_found("membership"));
        }

        apply_succession(&tx, departure.conversation_id, departure.succession).await?;
        let stored = insert_records(&tx, &departure.records).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn delete_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        succession: AdminSuccession,
        records: &[Message],
    ) -> AppResult<MembershipDeletion> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let locked = tx
            .query_opt(
                "SELECT id FROM conversations WHERE id = $1 FOR UPDATE",
                &[&conversation_id],
            )
            .await?;
        if locked.is_none() {
            return Ok(MembershipDeletion::NotMember);
        }

        let deleted = tx
            .execute(
                "DELETE FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
                &[&conversation_id, &user_id],
            )
            .await?;
        if deleted == 0 {
            return Ok(MembershipDeletion::NotMember);
        }

        tx.execute(
            "UPDATE conversations SET direct_key = NULL WHERE id = $1",
            &[&conversation_id],
        )
        .await?;

        let remaining: i64 = tx
            .query_one(
                "SELECT COUNT(*) AS remaining FROM conversation_members WHERE conversation_id = $1",
                &[&conversation_id],
            )
            .await?
            .get("remaining");
        if remaining > 0 {
            apply_succession(&tx, conversation_id, succession).await?;
            insert_records(&tx, records).await?;
            tx.commit().await?;
            return Ok(MembershipDeletion::Retained {
                remaining: remaining as usize,
            });
        }

        const CASCADE: [&str; 8] = [
            "DELETE FROM delivery_states WHERE message_id IN (SELECT id FROM messages WHERE conversation_id = $1)",
            "DELETE FROM hidden_messages WHERE message_id IN (SELECT id FROM messages WHERE conversation_id = $1)",
            "DELETE FROM mentions WHERE message_id IN (SELECT id FROM messages WHERE conversation_id = $1)",
            "DELETE FROM reactions WHERE message_id IN (SELECT id FROM messages WHERE conversation_id = $1)",
            "DELETE FROM messages WHERE conversation_id = $1",
            "DELETE FROM call_participants WHERE call_id IN (SELECT id FROM calls WHERE conversation_id = $1)",
            "DELETE FROM calls WHERE conversation_id = $1",
            "DELETE FROM conversations WHERE id = $1",
        ];
        for statement in CASCADE {
            tx.execute(statement, &[&conversation_id]).await?;
        }

        tx.commit().await?;
        debug!(conversation_id = %conversation_id, "Conversation purged after last member left");
        Ok(MembershipDeletion::Purged)
    }

    async fn insert_message(
        &self,
        message: &Message,
        mentions: &[Uuid],
        deliveries: &[DeliveryRecord],
    ) -> AppResult<Message> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let seq = insert_message_row(&tx, message).await?;

        for user_id in mentions {
            tx.execute(
                "INSERT INTO mentions (message_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&message.id, user_id],
            )
            .await?;
        }

        for record in deliveries {
            tx.execute(
                "INSERT INTO delivery_states (message_id, recipient_id, state, updated_at) \
                 VALUES ($1, $2, $3, $4)",
                &[
                    &record.message_id,
                    &record.recipient_id,
                    &record.state.to_db(),
                    &record.updated_at,
                ],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(Message {
            seq,
            ..message.clone()
        })
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        let client = self.client().await?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = $1");
        let row = client.query_opt(sql.as_str(), &[&message_id]).await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> AppResult<Vec<Message>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.conversation_id = $1 \
             AND NOT EXISTS (SELECT 1 FROM hidden_messages h WHERE h.message_id = m.id AND h.user_id = $2) \
             ORDER BY m.created_at ASC, m.seq ASC"
        );
        let rows = client
            .query(sql.as_str(), &[&conversation_id, &viewer_id])
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn update_message_body(
        &self,
        message_id: Uuid,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE messages SET body = $2, edited_at = $3 WHERE id = $1",
                &[&message_id, &body, &edited_at],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::not_found("message"));
        }
        Ok(())
    }

    async fn mark_message_deleted(
        &self,
        message_id: Uuid,
        placeholder: &str,
        deleted_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE messages SET body = $2, deleted_at = $3 WHERE id = $1",
                &[&message_id, &placeholder, &deleted_at],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::not_found("message"));
        }
        Ok(())
    }

    async fn hide_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO hidden_messages (message_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
                &[&message_id, &user_id],
            )
            .await?;
        Ok(())
    }

    async fn hide_conversation(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        let client = self.client().await?;
        let hidden = client
            .execute(
                "INSERT INTO hidden_messages (message_id, user_id) \
                 SELECT id, $2 FROM messages WHERE conversation_id = $1 \
                 ON CONFLICT DO NOTHING",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(hidden)
    }

    async fn list_mentions(&self, message_ids: &[Uuid]) -> AppResult<Vec<Mention>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT message_id, user_id FROM mentions WHERE message_id = ANY($1)",
                &[&message_ids],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| Mention {
                message_id: r.get("message_id"),
                user_id: r.get("user_id"),
            })
            .collect())
    }

    async fn upsert_reaction(&self, reaction: &Reaction) -> AppResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (message_id, user_id) \
                 DO UPDATE SET emoji = EXCLUDED.emoji, created_at = EXCLUDED.created_at",
                &[
                    &reaction.message_id,
                    &reaction.user_id,
                    &reaction.emoji,
                    &reaction.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete_reaction(&self, message_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let client = self.client().await?;
        let deleted = client
            .execute(
                "DELETE FROM reactions WHERE message_id = $1 AND user_id = $2",
                &[&message_id, &user_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn list_reactions(&self, message_ids: &[Uuid]) -> AppResult<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT message_id, user_id, emoji, created_at FROM reactions \
                 WHERE message_id = ANY($1) ORDER BY created_at",
                &[&message_ids],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| Reaction {
                message_id: r.get("message_id"),
                user_id: r.get("user_id"),
                emoji: r.get("emoji"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn list_deliveries(&self, conversation_id: Uuid) -> AppResult<Vec<DeliveryRecord>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT ds.message_id, ds.recipient_id, ds.state, ds.updated_at \
                 FROM delivery_states ds JOIN messages m ON m.id = ds.message_id \
                 WHERE m.conversation_id = $1 \
                 ORDER BY m.created_at, m.seq",
                &[&conversation_id],
            )
            .await?;
        rows.iter().map(delivery_from_row).collect()
    }

    async fn advance_deliveries(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        target: DeliveryState,
        at: DateTime<Utc>,
    ) -> AppResult<u64> {
        let behind: Vec<&str> = DeliveryState::below(target)
            .iter()
            .map(DeliveryState::to_db)
            .collect();
        if behind.is_empty() {
            return Ok(0);
        }
        let client = self.client().await?;
        let changed = client
            .execute(
                "UPDATE delivery_states ds SET state = $3, updated_at = $4 \
                 FROM messages m \
                 WHERE ds.message_id = m.id AND m.conversation_id = $1 \
                 AND ds.recipient_id = $2 AND ds.state = ANY($5)",
                &[
                    &conversation_id,
                    &recipient_id,
                    &target.to_db(),
                    &at,
                    &behind,
                ],
            )
            .await?;
        Ok(changed)
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS unread FROM delivery_states ds \
                 JOIN messages m ON m.id = ds.message_id \
                 WHERE m.conversation_id = $1 AND ds.recipient_id = $2 AND ds.state <> 'read'",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.get("unread"))
    }

    async fn insert_call(&self, call: &Call) -> AppResult<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "INSERT INTO calls (id, conversation_id, kind, state, created_by, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &call.id,
                &call.conversation_id,
                &call.kind.to_db(),
                &call.state.to_db(),
                &call.created_by,
                &call.started_at,
            ],
        )
        .await?;
        tx.execute(
            "INSERT INTO call_participants (call_id, user_id, joined_at) VALUES ($1, $2, $3)",
            &[&call.id, &call.created_by, &call.started_at],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
