use std::future::Future;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use pulse_types::api::MarkReadResponse;
use pulse_types::{Message, MessageId, VoteDirection, VoteTally, VoteTarget};

use crate::error::ApiError;

/// The request/response operations the sync layer needs from the service.
///
/// Every call is made as the session the backend was built with.
pub trait Backend: Send + Sync + 'static {
    /// Every message the user sent or received.
    fn fetch_messages(&self, user_id: &str) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Returns the stored message as the server assigned it.
    fn send_message(&self, to_id: &str, content: &str) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn mark_read(
        &self,
        partner_id: &str,
        message_ids: &[MessageId],
    ) -> impl Future<Output = Result<MarkReadResponse, ApiError>> + Send;

    /// Returns the authoritative tally after the vote is applied.
    fn vote(
        &self,
        target: &VoteTarget,
        direction: VoteDirection,
    ) -> impl Future<Output = Result<VoteTally, ApiError>> + Send;
}

/// reqwest-backed `Backend`.
#[derive(Clone)]
pub struct HttpBackend {
    pub(crate) client: Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.token))
    }
}

/// Send a request and decode a JSON body, mapping failure statuses to `ApiError`.
pub(crate) async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ApiError> {
    let resp = builder.send().await?;
    let resp = check_status(resp).await?;
    resp.json::<T>().await.map_err(|e| ApiError::Decode(e.to_string()))
}

async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();
    debug!("{} returned {}: {}", url, status, body);
    Err(ApiError::from_status(status, body))
}

impl Backend for HttpBackend {
    async fn fetch_messages(&self, user_id: &str) -> Result<Vec<Message>, ApiError> {
        self.get_messages(user_id).await
    }

    async fn send_message(&self, to_id: &str, content: &str) -> Result<Message, ApiError> {
        self.post_message(to_id, content).await
    }

    async fn mark_read(&self, partner_id: &str, message_ids: &[MessageId]) -> Result<MarkReadResponse, ApiError> {
        self.post_read(partner_id, message_ids).await
    }

    async fn vote(&self, target: &VoteTarget, direction: VoteDirection) -> Result<VoteTally, ApiError> {
        self.post_vote(target, direction).await
    }
}
