use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned, opaque identifiers.
pub type MessageId = String;
pub type UserId = String;

/// A direct message between two users.
///
/// Everything except the read state is immutable once the server has assigned
/// an id. Read state only moves from unread to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub from_id: UserId,
    pub to_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// The participant on the other side of this message, relative to `me`.
    pub fn partner_of(&self, me: &str) -> &str {
        if self.from_id == me {
            &self.to_id
        } else {
            &self.from_id
        }
    }

    /// True if `me` received this message and has not read it yet.
    pub fn is_unread_for(&self, me: &str) -> bool {
        self.to_id == me && !self.is_read
    }
}

/// Server acknowledgement that a message was read by its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub read_at: DateTime<Utc>,
}

// -- Votes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// A single viewer's vote on a post or comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    #[default]
    None,
    Up,
    Down,
}

impl From<VoteDirection> for VoteState {
    fn from(dir: VoteDirection) -> Self {
        match dir {
            VoteDirection::Up => Self::Up,
            VoteDirection::Down => Self::Down,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum VoteTarget {
    Post(String),
    Comment(String),
}

impl VoteTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Post(id) | Self::Comment(id) => id,
        }
    }
}

impl fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post(id) => write!(f, "post:{}", id),
            Self::Comment(id) => write!(f, "comment:{}", id),
        }
    }
}

/// Aggregate counters for a post or comment together with the viewer's own vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteTally {
    pub upvotes: i64,
    pub downvotes: i64,
    pub viewer: VoteState,
}

impl VoteTally {
    pub fn new(upvotes: i64, downvotes: i64, viewer: VoteState) -> Self {
        Self {
            upvotes,
            downvotes,
            viewer,
        }
    }

    pub fn karma(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}
