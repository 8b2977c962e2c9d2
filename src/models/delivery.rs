use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Per-recipient progress of a message. Ordering follows the lifecycle,
/// transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending = 0,
    Sent = 1,
    Delivered = 2,
    Read = 3,
}

impl DeliveryState {
    pub const ALL: [DeliveryState; 4] = [
        DeliveryState::Pending,
        DeliveryState::Sent,
        DeliveryState::Delivered,
        DeliveryState::Read,
    ];

    /// State recorded at send time
    pub fn initial(recipient_online: bool) -> Self {
        if recipient_online {
            DeliveryState::Sent
        } else {
            DeliveryState::Pending
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Vocabulary of the realtime client protocol
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Pending => "pendiente",
            Self::Sent => "enviado",
            Self::Delivered => "entregado",
            Self::Read => "leido",
        }
    }

    /// `Some(target)` when moving there is a forward step
    pub fn advance(self, target: DeliveryState) -> Option<DeliveryState> {
        (target > self).then_some(target)
    }

    /// States a bulk transition to `target` may rewrite
    pub fn below(target: DeliveryState) -> Vec<DeliveryState> {
        Self::ALL.into_iter().filter(|s| *s < target).collect()
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub message_id: Uuid,
    pub recipient_id: Uuid,
    pub state: DeliveryState,
    pub updated_at: DateTime<Utc>,
}
