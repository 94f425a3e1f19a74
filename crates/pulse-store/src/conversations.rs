use std::collections::HashMap;

use pulse_types::{Message, UserId};

use crate::messages::MessageSet;

/// All messages exchanged with one partner, newest first.
///
/// Derived from a `MessageSet` snapshot on demand and never stored, so it
/// cannot drift from the collection it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub partner_id: UserId,
    pub messages: Vec<Message>,
    pub unread: usize,
}

impl Conversation {
    pub fn latest(&self) -> Option<&Message> {
        self.messages.first()
    }
}

fn newest_first(a: &Message, b: &Message) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
}

/// Partition the set by the other participant relative to `me`. Conversations
/// are ordered by their most recent message.
pub fn conversations(set: &MessageSet, me: &str) -> Vec<Conversation> {
    let mut by_partner: HashMap<&str, Vec<Message>> = HashMap::new();
    for msg in set.iter() {
        by_partner.entry(msg.partner_of(me)).or_default().push(msg.clone());
    }

    let mut result: Vec<Conversation> = by_partner
        .into_iter()
        .map(|(partner, mut messages)| {
            messages.sort_by(newest_first);
            let unread = messages.iter().filter(|m| m.is_unread_for(me)).count();
            Conversation {
                partner_id: partner.to_string(),
                messages,
                unread,
            }
        })
        .collect();

    result.sort_by(|a, b| match (a.latest(), b.latest()) {
        (Some(x), Some(y)) => newest_first(x, y),
        _ => a.partner_id.cmp(&b.partner_id),
    });
    result
}

/// Messages exchanged between `me` and `partner`, newest first.
pub fn conversation_with(set: &MessageSet, me: &str, partner: &str) -> Vec<Message> {
    let mut messages: Vec<Message> = set
        .iter()
        .filter(|m| m.partner_of(me) == partner)
        .cloned()
        .collect();
    messages.sort_by(newest_first);
    messages
}
