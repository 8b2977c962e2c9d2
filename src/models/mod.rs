pub mod call;
pub mod contact;
pub mod conversation;
pub mod delivery;
pub mod membership;
pub mod message;
pub mod user;

pub use call::{Call, CallKind, CallState};
pub use contact::Contact;
pub use conversation::Conversation;
pub use delivery::{DeliveryRecord, DeliveryState};
pub use membership::{AdminSuccession, Departure, Membership, MembershipDeletion};
pub use message::{Attachment, DeleteMode, Mention, Message, MessageKind, Reaction, SystemEvent};
pub use user::User;
