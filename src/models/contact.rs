use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directed address-book edge; the alias is only visible to its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub target_id: Uuid,
    pub alias: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(owner_id: Uuid, target_id: Uuid, alias: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            target_id,
            alias: normalize_alias(alias),
            created_at: Utc::now(),
        }
    }
}

/// Trimmed alias, blank collapses to `None`
pub fn normalize_alias(alias: Option<&str>) -> Option<String> {
    alias
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
}
