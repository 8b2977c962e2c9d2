//! Test Harness Module
//!
//! Shared setup for the integration tests:
//! - In-memory store and a live connection registry
//! - Tokens signed with the test secret
//! - Helpers to seed users and conversations
//! - Frame helpers for registry channels
//! - A fault-injecting store for failure paths

#![allow(dead_code)]

pub mod faulty_store;

use realtime_messaging_service::{
    config::Config,
    middleware::auth::JwtVerifier,
    models::User,
    services::{attachment_store::LocalDiskStore, conversation_service::ConversationService},
    state::AppState,
    store::{memory::InMemoryStore, ChatStore},
    websocket::ConnectionRegistry,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret";

/// Test Environment
pub struct TestEnvironment {
    pub state: AppState,
    pub jwt: JwtVerifier,
    // dropped with the environment
    uploads: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn ChatStore>) -> Self {
        let uploads = TempDir::new().expect("Failed to create upload dir");
        let upload_dir = uploads.path().to_string_lossy().to_string();
        let config = Config::for_memory(JWT_SECRET, &upload_dir);

        let state = AppState {
            store,
            registry: ConnectionRegistry::new(),
            attachments: Arc::new(LocalDiskStore::new(
                uploads.path(),
                &config.public_base_url,
            )),
            config: Arc::new(config),
            auth: Arc::new(JwtVerifier::new(JWT_SECRET)),
        };

        Self {
            state,
            jwt: JwtVerifier::new(JWT_SECRET),
            uploads,
        }
    }

    pub fn store(&self) -> &dyn ChatStore {
        self.state.store.as_ref()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.state.registry
    }

    pub fn upload_root(&self) -> &std::path::Path {
        self.uploads.path()
    }

    pub async fn user(&self, phone: &str, first_name: &str) -> User {
        let user = User::new(phone).with_name(first_name, None);
        self.store()
            .upsert_user(&user)
            .await
            .expect("Failed to seed user");
        user
    }

    pub fn token(&self, user_id: Uuid) -> String {
        self.jwt
            .issue(user_id, chrono::Duration::minutes(10))
            .expect("Failed to sign token")
    }

    pub fn bearer(&self, user_id: Uuid) -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", self.token(user_id)))
    }

    /// Group created by `creator` with `members`
    pub async fn group(&self, creator: Uuid, members: &[Uuid], title: &str) -> Uuid {
        ConversationService::create(
            self.store(),
            self.registry(),
            creator,
            members,
            true,
            Some(title),
        )
        .await
        .expect("Failed to create group")
        .detail
        .id
    }

    pub async fn direct(&self, requester: Uuid, other: Uuid) -> Uuid {
        ConversationService::create(self.store(), self.registry(), requester, &[other], false, None)
            .await
            .expect("Failed to create direct conversation")
            .detail
            .id
    }
}

/// Let wall-clock timestamps move past the previous write
pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Every frame currently queued on a registry channel, parsed
pub fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).expect("Frame is not JSON"));
    }
    frames
}

/// Frames of one event name, in arrival order
pub fn events_named(frames: &[Value], name: &str) -> Vec<Value> {
    frames
        .iter()
        .filter(|f| f["event"] == name)
        .map(|f| f["data"].clone())
        .collect()
}
