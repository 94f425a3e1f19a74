/// Pulse shared types.
///
/// Wire and data model shared by the store, gateway, HTTP client and session
/// crates. Field names follow the backend's camelCase JSON.

pub mod api;
pub mod events;
pub mod models;

pub use api::Session;
pub use events::PushEvent;
pub use models::{Message, MessageId, ReadReceipt, UserId, VoteDirection, VoteState, VoteTally, VoteTarget};
