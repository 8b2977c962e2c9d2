//! Membership rows and the visibility window they grant
//!
//! A row is created active on join, flipped inactive with `left_at` on
//! leave/removal (kept for history), and only hard-deleted when the user
//! deletes the conversation for themself.

use super::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn new_active(conversation_id: Uuid, user_id: Uuid, joined_at: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            user_id,
            active: true,
            joined_at,
            left_at: None,
        }
    }

    /// Whether a message created at `created_at` falls inside this member's window
    pub fn can_see(&self, created_at: DateTime<Utc>) -> bool {
        if created_at < self.joined_at {
            return false;
        }
        match (self.active, self.left_at) {
            (false, Some(left_at)) => created_at <= left_at,
            _ => true,
        }
    }
}

/// What happens to the admin seat when a member departs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminSuccession {
    /// The departing member was not the admin
    Unchanged,
    Transferred(Uuid),
    /// Admin left and nobody active remains
    Orphaned,
}

/// A leave/removal applied atomically: membership flip, admin change and
/// the system records announcing them.
#[derive(Debug, Clone)]
pub struct Departure {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub left_at: DateTime<Utc>,
    pub succession: AdminSuccession,
    pub records: Vec<Message>,
}

/// Result of hard-deleting one membership row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipDeletion {
    NotMember,
    Retained { remaining: usize },
    /// Last row removed; the conversation and its dependents are gone
    Purged,
}
