use crate::{
    config::Config,
    middleware::auth::TokenVerifier,
    services::attachment_store::AttachmentStore,
    store::ChatStore,
    websocket::ConnectionRegistry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub registry: ConnectionRegistry,
    pub config: Arc<Config>,
    /// Verifies access tokens issued by the identity subsystem
    pub auth: Arc<dyn TokenVerifier>,
    pub attachments: Arc<dyn AttachmentStore>,
}
