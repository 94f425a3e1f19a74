use serde_json::{Map, Value};
use tracing::{trace, warn};

use pulse_types::events::MESSAGE_READ_TYPE;
use pulse_types::{Message, PushEvent, ReadReceipt};

/// Fields a frame must carry to be taken as a message.
pub const MESSAGE_FIELDS: [&str; 5] = ["id", "fromId", "toId", "content", "createdAt"];

/// Fields a read-receipt frame must carry.
pub const READ_RECEIPT_FIELDS: [&str; 2] = ["messageId", "readAt"];

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("unparsable frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("unknown frame type {0}")]
    UnknownType(String),

    #[error("incomplete {kind} frame, missing {missing:?}")]
    Incomplete {
        kind: &'static str,
        missing: Vec<&'static str>,
    },
}

enum FrameKind {
    Message,
    ReadReceipt,
}

fn missing_fields(obj: &Map<String, Value>, required: &[&'static str]) -> Vec<&'static str> {
    required
        .iter()
        .copied()
        .filter(|field| obj.get(*field).is_none_or(Value::is_null))
        .collect()
}

fn classify(value: &Value) -> Result<FrameKind, RouteError> {
    let Value::Object(obj) = value else {
        return Err(RouteError::NotAnObject);
    };

    let (kind, label, required) = match obj.get("type") {
        Some(Value::String(t)) if t == MESSAGE_READ_TYPE => (FrameKind::ReadReceipt, "read receipt", &READ_RECEIPT_FIELDS[..]),
        Some(other) => return Err(RouteError::UnknownType(other.to_string())),
        // No discriminator: a full message (new or corrected).
        None => (FrameKind::Message, "message", &MESSAGE_FIELDS[..]),
    };

    let missing = missing_fields(obj, required);
    if !missing.is_empty() {
        return Err(RouteError::Incomplete { kind: label, missing });
    }
    Ok(kind)
}

/// Classify a raw push frame.
pub fn route(raw: &str) -> Result<PushEvent, RouteError> {
    let value: Value = serde_json::from_str(raw)?;
    match classify(&value)? {
        FrameKind::Message => Ok(PushEvent::Message(serde_json::from_value::<Message>(value)?)),
        FrameKind::ReadReceipt => Ok(PushEvent::MessageRead(serde_json::from_value::<ReadReceipt>(value)?)),
    }
}

/// Classifies inbound frames and keeps counts for diagnostics. Bad frames are
/// logged and dropped; they never stop the stream.
#[derive(Debug, Default)]
pub struct EventRouter {
    routed: u64,
    dropped: u64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routed(&self) -> u64 {
        self.routed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn route(&mut self, raw: &str) -> Result<PushEvent, RouteError> {
        match route(raw) {
            Ok(event) => {
                self.routed += 1;
                trace!("Routed {} frame for {}", event.kind(), event.message_id());
                Ok(event)
            }
            Err(e) => {
                self.dropped += 1;
                let preview: String = raw.chars().take(200).collect();
                warn!("Dropping push frame: {} -- raw: {}", e, preview);
                Err(e)
            }
        }
    }
}
