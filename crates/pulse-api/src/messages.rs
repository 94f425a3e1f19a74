use tracing::debug;

use pulse_types::api::{MarkReadRequest, MarkReadResponse, SendMessageRequest};
use pulse_types::{Message, MessageId};

use crate::backend::{HttpBackend, send_json};
use crate::error::ApiError;

impl HttpBackend {
    /// GET /messages?userId={id}
    pub async fn get_messages(&self, user_id: &str) -> Result<Vec<Message>, ApiError> {
        let req = self
            .authed(self.client.get(self.url("messages")))
            .query(&[("userId", user_id)]);
        let messages: Vec<Message> = send_json(req).await?;
        debug!("Fetched {} messages for {}", messages.len(), user_id);
        Ok(messages)
    }

    /// POST /messages
    pub async fn post_message(&self, to_id: &str, content: &str) -> Result<Message, ApiError> {
        let body = SendMessageRequest {
            to_id: to_id.to_string(),
            content: content.to_string(),
        };
        let req = self.authed(self.client.post(self.url("messages"))).json(&body);
        send_json(req).await
    }

    /// POST /messages/read
    pub async fn post_read(&self, partner_id: &str, message_ids: &[MessageId]) -> Result<MarkReadResponse, ApiError> {
        let body = MarkReadRequest {
            partner_id: partner_id.to_string(),
            message_ids: message_ids.to_vec(),
        };
        let req = self.authed(self.client.post(self.url("messages/read"))).json(&body);
        send_json(req).await
    }
}
