use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile row owned by the identity subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(phone: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.to_string(),
            first_name: None,
            last_name: None,
            avatar_url: None,
            online: false,
            last_seen_at: None,
        }
    }

    pub fn with_name(mut self, first: &str, last: Option<&str>) -> Self {
        self.first_name = Some(first.to_string());
        self.last_name = last.map(str::to_string);
        self
    }

    /// First and last name joined, `None` when both are blank
    pub fn full_name(&self) -> Option<String> {
        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!joined.is_empty()).then_some(joined)
    }
}
