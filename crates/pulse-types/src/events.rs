use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageId, ReadReceipt};

/// Discriminator the backend puts on read-receipt frames.
pub const MESSAGE_READ_TYPE: &str = "messageRead";

/// A push frame after classification.
///
/// On the wire a message frame carries no `type` field at all, while a read
/// receipt is tagged `{"type":"messageRead", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PushEvent {
    /// A new message, or a server-side correction of one we already hold
    Message(Message),

    /// The recipient read a message
    MessageRead(ReadReceipt),
}

impl PushEvent {
    /// Id of the message this event concerns.
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Message(msg) => &msg.id,
            Self::MessageRead(receipt) => &receipt.message_id,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::MessageRead(_) => MESSAGE_READ_TYPE,
        }
    }
}
