use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MessageId, UserId, VoteDirection, VoteState, VoteTally};

// -- JWT Claims --

/// Claims carried in the bearer token. The client never verifies the
/// signature; it only reads `sub` to learn who it is logged in as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    #[serde(default)]
    pub username: String,
    pub exp: usize,
}

// -- Session --

/// The authenticated identity every request and connection is made as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub token: String,
}

impl Session {
    pub fn new(user_id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }

    /// Both a user identity and a credential are present.
    pub fn is_complete(&self) -> bool {
        !self.user_id.trim().is_empty() && !self.token.trim().is_empty()
    }
}

// -- Messages --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub to_id: UserId,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub partner_id: UserId,
    pub message_ids: Vec<MessageId>,
}

/// Authoritative result of a mark-read call: the ids the server flipped and
/// the timestamp it recorded for them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub message_ids: Vec<MessageId>,
    pub read_at: DateTime<Utc>,
}

// -- Votes --

#[derive(Debug, Serialize)]
pub struct VoteRequest {
    pub direction: VoteDirection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub upvotes: i64,
    pub downvotes: i64,
    #[serde(default)]
    pub user_vote: Option<VoteDirection>,
}

impl From<VoteResponse> for VoteTally {
    fn from(resp: VoteResponse) -> Self {
        VoteTally {
            upvotes: resp.upvotes,
            downvotes: resp.downvotes,
            viewer: resp.user_vote.map(VoteState::from).unwrap_or_default(),
        }
    }
}
