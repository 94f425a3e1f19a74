use tracing::debug;

use pulse_types::api::{VoteRequest, VoteResponse};
use pulse_types::{VoteDirection, VoteTally, VoteTarget};

use crate::backend::{HttpBackend, send_json};
use crate::error::ApiError;

fn vote_path(target: &VoteTarget) -> String {
    match target {
        VoteTarget::Post(id) => format!("posts/{}/vote", id),
        VoteTarget::Comment(id) => format!("comments/{}/vote", id),
    }
}

impl HttpBackend {
    /// POST /posts/{id}/vote or /comments/{id}/vote. The server applies the
    /// same toggle rules as the client and answers with the resulting tally.
    pub async fn post_vote(&self, target: &VoteTarget, direction: VoteDirection) -> Result<VoteTally, ApiError> {
        let req = self
            .authed(self.client.post(self.url(&vote_path(target))))
            .json(&VoteRequest { direction });
        let resp: VoteResponse = send_json(req).await?;
        debug!(
            "Vote {} on {} settled at +{}/-{}",
            direction.as_str(),
            target,
            resp.upvotes,
            resp.downvotes
        );
        Ok(resp.into())
    }
}
