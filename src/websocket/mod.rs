use crate::metrics;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod handlers;
pub mod message_types;

/// Unique identifier for one websocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every connection of the user, across devices and tabs
    User(Uuid),
    /// Every connection subscribed to the conversation
    Conversation(Uuid),
}

/// Presence transition to broadcast process-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
    pub user_id: Uuid,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

struct Connection {
    user_id: Uuid,
    sender: UnboundedSender<String>,
    conversations: HashSet<Uuid>,
}

struct PresenceEntry {
    /// Connection on record; only its disconnect flips the user offline
    connection: Option<ConnectionId>,
    online: bool,
    last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct Rooms {
    connections: HashMap<ConnectionId, Connection>,
    users: HashMap<Uuid, HashSet<ConnectionId>>,
    conversations: HashMap<Uuid, HashSet<ConnectionId>>,
    presence: HashMap<Uuid, PresenceEntry>,
}

impl Rooms {
    fn detach(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        if let Some(set) = self.users.get_mut(&connection.user_id) {
            set.remove(&id);
            if set.is_empty() {
                self.users.remove(&connection.user_id);
            }
        }
        for conversation_id in &connection.conversations {
            if let Some(set) = self.conversations.get_mut(conversation_id) {
                set.remove(&id);
                if set.is_empty() {
                    self.conversations.remove(conversation_id);
                }
            }
        }
        Some(connection)
    }

    fn targets(&self, scopes: &[Scope]) -> HashSet<ConnectionId> {
        let mut targets = HashSet::new();
        for scope in scopes {
            let members = match scope {
                Scope::User(user_id) => self.users.get(user_id),
                Scope::Conversation(conversation_id) => self.conversations.get(conversation_id),
            };
            if let Some(members) = members {
                targets.extend(members.iter().copied());
            }
        }
        targets
    }

    /// Send to each target once; senders whose receiver is gone are pruned
    fn deliver(&mut self, targets: HashSet<ConnectionId>, frame: &str) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for id in targets {
            match self.connections.get(&id) {
                Some(connection) if connection.sender.send(frame.to_string()).is_ok() => {
                    delivered += 1
                }
                Some(_) => dead.push(id),
                None => {}
            }
        }
        if !dead.is_empty() {
            tracing::debug!(dead = dead.len(), "Pruned closed connections during fan-out");
            for id in &dead {
                self.detach(*id);
            }
        }
        metrics::record_frames(delivered, dead.len());
        delivered
    }
}

/// Presence registry and room membership for live websocket connections
///
/// Process-local: with several instances each one only sees its own
/// connections, so presence degrades to per-instance visibility.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Rooms>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new connection to the user scope
    ///
    /// Returns the connection id and the channel its frames arrive on.
    pub async fn connect(&self, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.connections.insert(
            id,
            Connection {
                user_id,
                sender: tx,
                conversations: HashSet::new(),
            },
        );
        guard.users.entry(user_id).or_default().insert(id);
        metrics::WS_CONNECTIONS.set(guard.connections.len() as i64);

        tracing::debug!(
            connection = ?id,
            user_id = %user_id,
            user_connections = guard.users.get(&user_id).map(|s| s.len()).unwrap_or(0),
            "Connection attached"
        );
        (id, rx)
    }

    /// Mark the connection's user online with this connection on record
    pub async fn register(&self, id: ConnectionId) -> Option<PresenceChange> {
        let mut guard = self.inner.write().await;
        let user_id = guard.connections.get(&id)?.user_id;
        let now = Utc::now();
        guard.presence.insert(
            user_id,
            PresenceEntry {
                connection: Some(id),
                online: true,
                last_seen: now,
            },
        );
        Some(PresenceChange {
            user_id,
            online: true,
            last_seen: now,
        })
    }

    /// Detach a connection from every scope
    ///
    /// The user goes offline only when this connection is still the one on
    /// record, so a superseded connection closing late changes nothing.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<PresenceChange> {
        let mut guard = self.inner.write().await;
        let user_id = guard
            .detach(id)
            .map(|c| c.user_id)
            .or_else(|| {
                guard
                    .presence
                    .iter()
                    .find(|(_, p)| p.connection == Some(id))
                    .map(|(user_id, _)| *user_id)
            });
        metrics::WS_CONNECTIONS.set(guard.connections.len() as i64);

        let user_id = user_id?;
        let entry = guard.presence.get_mut(&user_id)?;
        if entry.connection != Some(id) {
            tracing::debug!(connection = ?id, user_id = %user_id, "Stale disconnect ignored");
            return None;
        }
        let now = Utc::now();
        entry.connection = None;
        entry.online = false;
        entry.last_seen = now;
        Some(PresenceChange {
            user_id,
            online: false,
            last_seen: now,
        })
    }

    pub async fn subscribe(&self, id: ConnectionId, conversation_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        match guard.connections.get_mut(&id) {
            Some(connection) => {
                connection.conversations.insert(conversation_id);
            }
            None => return false,
        }
        guard
            .conversations
            .entry(conversation_id)
            .or_default()
            .insert(id);
        true
    }

    /// Drop every connection of the user from the conversation scope
    ///
    /// Returns how many connections were unsubscribed.
    pub async fn unsubscribe_user(&self, user_id: Uuid, conversation_id: Uuid) -> usize {
        let mut guard = self.inner.write().await;
        let ids: Vec<ConnectionId> = guard
            .users
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut removed = 0;
        for id in ids {
            if let Some(connection) = guard.connections.get_mut(&id) {
                connection.conversations.remove(&conversation_id);
            }
            if let Some(set) = guard.conversations.get_mut(&conversation_id) {
                if set.remove(&id) {
                    removed += 1;
                }
                if set.is_empty() {
                    guard.conversations.remove(&conversation_id);
                }
            }
        }
        tracing::debug!(
            user_id = %user_id,
            conversation_id = %conversation_id,
            removed,
            "User unsubscribed from conversation"
        );
        removed
    }

    pub async fn is_subscribed(&self, id: ConnectionId, conversation_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .map(|set| set.contains(&id))
            .unwrap_or(false)
    }

    /// Deliver a frame at most once to every connection in the union of
    /// `scopes`, optionally skipping the originating connection
    pub async fn publish(&self, scopes: &[Scope], frame: &str, skip: Option<ConnectionId>) -> usize {
        let mut guard = self.inner.write().await;
        let mut targets = guard.targets(scopes);
        if let Some(skip) = skip {
            targets.remove(&skip);
        }
        let delivered = guard.deliver(targets, frame);
        tracing::debug!(scopes = ?scopes, delivered, "Published frame");
        delivered
    }

    /// Every live connection in the process
    pub async fn broadcast_all(&self, frame: &str) -> usize {
        let mut guard = self.inner.write().await;
        let targets: HashSet<ConnectionId> = guard.connections.keys().copied().collect();
        guard.deliver(targets, frame)
    }

    /// Distinct users with at least one connection subscribed to the conversation
    pub async fn conversation_viewers(&self, conversation_id: Uuid) -> Vec<Uuid> {
        let guard = self.inner.read().await;
        let mut viewers: Vec<Uuid> = guard
            .conversations
            .get(&conversation_id)
            .map(|set| {
                set.iter()
                    .filter_map(|id| guard.connections.get(id).map(|c| c.user_id))
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default();
        viewers.sort();
        viewers
    }

    /// Deliver to the viewer's connections that are subscribed to the conversation
    pub async fn publish_to_viewer(&self, conversation_id: Uuid, viewer: Uuid, frame: &str) -> usize {
        let mut guard = self.inner.write().await;
        let targets: HashSet<ConnectionId> = match guard.conversations.get(&conversation_id) {
            Some(set) => set
                .iter()
                .filter(|id| {
                    guard
                        .connections
                        .get(id)
                        .map(|c| c.user_id == viewer)
                        .unwrap_or(false)
                })
                .copied()
                .collect(),
            None => return 0,
        };
        guard.deliver(targets, frame)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .presence
            .get(&user_id)
            .map(|p| p.online)
            .unwrap_or(false)
    }

    pub async fn last_seen(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .await
            .presence
            .get(&user_id)
            .map(|p| p.last_seen)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}
