pub mod attachment_store;
pub mod call_service;
pub mod contact_service;
pub mod conversation_service;
pub mod delivery_service;
pub mod display;
pub mod fanout;
pub mod membership_service;
pub mod message_service;
pub mod presence_service;

// Re-export key types for convenience
pub use attachment_store::{AttachmentStore, LocalDiskStore};
pub use call_service::CallService;
pub use contact_service::{ContactService, ContactView};
pub use conversation_service::{ConversationService, ConversationSummary, MemberView};
pub use delivery_service::DeliveryService;
pub use membership_service::MembershipService;
pub use message_service::{MessageService, MessageView, SentMessage};
pub use presence_service::PresenceService;
