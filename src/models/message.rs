use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body left behind by a delete-for-everyone
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";
pub const MAX_EMOJI_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Normal,
    System,
    Attachment,
}

impl MessageKind {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "system" => Some(Self::System),
            "attachment" => Some(Self::Attachment),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::System => "system",
            Self::Attachment => "attachment",
        }
    }

    /// Vocabulary of the realtime client protocol
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::System => "sistema",
            Self::Attachment => "archivo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    /// images, videos, audios, documents or others
    pub category: String,
    pub size: i64,
    pub file_name: String,
}

/// Membership-change facts stored on system messages. Display text is
/// produced per viewer at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    MemberLeft { user_id: Uuid },
    MemberRemoved { actor_id: Uuid, user_id: Uuid },
    MemberAdded { actor_id: Uuid, user_id: Uuid },
    AdminChanged { user_id: Uuid },
}

impl SystemEvent {
    /// Users whose names appear in the rendered text
    pub fn subjects(&self) -> Vec<Uuid> {
        match *self {
            SystemEvent::MemberLeft { user_id } | SystemEvent::AdminChanged { user_id } => {
                vec![user_id]
            }
            SystemEvent::MemberRemoved { actor_id, user_id }
            | SystemEvent::MemberAdded { actor_id, user_id } => vec![actor_id, user_id],
        }
    }

    pub fn render(&self, viewer: Uuid, name_of: impl Fn(Uuid) -> String) -> String {
        match *self {
            SystemEvent::MemberLeft { user_id } if user_id == viewer => {
                "You left the group".to_string()
            }
            SystemEvent::MemberLeft { user_id } => format!("{} left the group", name_of(user_id)),
            SystemEvent::MemberRemoved { actor_id, user_id } => {
                pairwise(viewer, actor_id, user_id, "removed", &name_of)
            }
            SystemEvent::MemberAdded { actor_id, user_id } => {
                pairwise(viewer, actor_id, user_id, "added", &name_of)
            }
            SystemEvent::AdminChanged { user_id } if user_id == viewer => {
                "You are now the admin".to_string()
            }
            SystemEvent::AdminChanged { user_id } => {
                format!("{} is now the admin", name_of(user_id))
            }
        }
    }
}

fn pairwise(
    viewer: Uuid,
    actor_id: Uuid,
    user_id: Uuid,
    verb: &str,
    name_of: &impl Fn(Uuid) -> String,
) -> String {
    if viewer == actor_id {
        format!("You {verb} {}", name_of(user_id))
    } else if viewer == user_id {
        format!("{} {verb} you", name_of(actor_id))
    } else {
        format!("{} {verb} {}", name_of(actor_id), name_of(user_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    /// Store-assigned insertion order, tiebreak for equal timestamps
    pub seq: i64,
    pub conversation_id: Uuid,
    /// `None` for system messages
    pub sender_id: Option<Uuid>,
    pub body: String,
    pub kind: MessageKind,
    pub system_event: Option<SystemEvent>,
    pub attachment: Option<Attachment>,
    pub reply_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn text(
        conversation_id: Uuid,
        sender_id: Uuid,
        body: String,
        reply_to_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            conversation_id,
            sender_id: Some(sender_id),
            body,
            kind: MessageKind::Normal,
            system_event: None,
            attachment: None,
            reply_to_id,
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
        }
    }

    pub fn with_attachment(
        conversation_id: Uuid,
        sender_id: Uuid,
        caption: String,
        attachment: Attachment,
    ) -> Self {
        Self {
            kind: MessageKind::Attachment,
            attachment: Some(attachment),
            ..Self::text(conversation_id, sender_id, caption, None)
        }
    }

    pub fn system(conversation_id: Uuid, event: SystemEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            conversation_id,
            sender_id: None,
            body: String::new(),
            kind: MessageKind::System,
            system_event: Some(event),
            attachment: None,
            reply_to_id: None,
            created_at,
            edited_at: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DeleteMode {
    #[serde(rename = "self", alias = "para_mi")]
    ForSelf,
    #[serde(rename = "everyone", alias = "para_todos")]
    ForEveryone,
}

impl DeleteMode {
    /// Vocabulary of the realtime client protocol
    pub fn wire_name(&self) -> &'static str {
        match self {
            DeleteMode::ForSelf => "para_mi",
            DeleteMode::ForEveryone => "para_todos",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub message_id: Uuid,
    pub user_id: Uuid,
}

/// One reaction per (message, user); reacting again replaces the emoji
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

impl Reaction {
    pub fn validate_emoji(raw: &str) -> AppResult<String> {
        let emoji = raw.trim();
        if emoji.is_empty() {
            return Err(AppError::invalid("emoji is required"));
        }
        if emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(AppError::invalid("emoji is too long"));
        }
        Ok(emoji.to_string())
    }
}
