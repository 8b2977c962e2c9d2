use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_GROUP_TITLE: &str = "New group";
pub const DEFAULT_DIRECT_TITLE: &str = "Chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub title: Option<String>,
    pub is_group: bool,
    /// Current admin; `None` once the group is orphaned
    pub creator_id: Option<Uuid>,
    /// Canonical pair key, set only while a one-to-one chat qualifies for reuse
    #[serde(skip)]
    pub direct_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.creator_id == Some(user_id)
    }
}

/// Order-independent key for a pair of users
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", low.simple(), high.simple())
}
