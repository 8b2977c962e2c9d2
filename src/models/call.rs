use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    #[serde(alias = "voz")]
    Voice,
    Video,
}

impl CallKind {
    pub fn to_db(&self) -> &'static str {
        match self {
            CallKind::Voice => "voice",
            CallKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Started,
    Ended,
    Failed,
}

impl CallState {
    pub fn to_db(&self) -> &'static str {
        match self {
            CallState::Started => "started",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        }
    }
}

/// Signaling session record; media never touches the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub kind: CallKind,
    pub state: CallState,
    pub created_by: Uuid,
    pub started_at: DateTime<Utc>,
}
