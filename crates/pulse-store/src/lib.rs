/// Pulse client-side cache.
///
/// - `messages`: the shared message collection, reconciled from bulk fetches,
///   push events and local send/read confirmations
/// - `conversations`: pure per-partner views derived from a message snapshot
/// - `speculative`: apply-now, confirm-later state with snapshot rollback
/// - `votes`: optimistic vote tallies built on `speculative`
/// - `read_marks`: guards against submitting the same id to mark-read twice

pub mod conversations;
pub mod messages;
pub mod read_marks;
pub mod speculative;
pub mod votes;

pub use conversations::{Conversation, conversation_with, conversations};
pub use messages::{MessageSet, MessageStore};
pub use read_marks::ReadMarkTracker;
pub use speculative::{Speculative, Ticket};
pub use votes::{PendingVote, UnknownTarget, VoteStore, cast_vote};
