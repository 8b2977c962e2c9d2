//! Per-viewer display names
//!
//! Aliases are private to their owner, so every name shown to a user is
//! resolved against that user's own contacts and never cached across viewers.

use crate::error::AppResult;
use crate::models::conversation::DEFAULT_DIRECT_TITLE;
use crate::models::User;
use crate::store::ChatStore;
use std::collections::HashMap;
use uuid::Uuid;

/// Shown when a user row is missing entirely
pub const UNKNOWN_USER: &str = "Contact";

pub struct DisplayNames {
    aliases: HashMap<Uuid, String>,
    users: HashMap<Uuid, User>,
}

impl DisplayNames {
    /// Resolve names of `user_ids` as seen by `viewer`
    pub async fn load(store: &dyn ChatStore, viewer: Uuid, user_ids: &[Uuid]) -> AppResult<Self> {
        let aliases = store.aliases(viewer, user_ids).await?;
        let users = store
            .get_users(user_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        Ok(Self { aliases, users })
    }

    /// alias > phone, the form used inside event payloads and system texts
    pub fn short_name(&self, user_id: Uuid) -> String {
        self.aliases
            .get(&user_id)
            .cloned()
            .or_else(|| self.users.get(&user_id).map(|u| u.phone.clone()))
            .unwrap_or_else(|| UNKNOWN_USER.to_string())
    }

    /// alias > first and last name > phone
    pub fn full_name(&self, user_id: Uuid) -> String {
        if let Some(alias) = self.aliases.get(&user_id) {
            return alias.clone();
        }
        match self.users.get(&user_id) {
            Some(user) => user.full_name().unwrap_or_else(|| user.phone.clone()),
            None => UNKNOWN_USER.to_string(),
        }
    }

    pub fn user(&self, user_id: Uuid) -> Option<&User> {
        self.users.get(&user_id)
    }

    /// Title of a one-to-one chat as seen by the viewer
    pub fn direct_title(&self, other: Option<Uuid>) -> String {
        match other {
            Some(other) if self.aliases.contains_key(&other) || self.users.contains_key(&other) => {
                self.full_name(other)
            }
            _ => DEFAULT_DIRECT_TITLE.to_string(),
        }
    }
}
