use std::collections::HashSet;

use tracing::debug;

use pulse_types::{MessageId, UserId};

use crate::messages::MessageSet;

/// Tracks which message ids have already been put in a mark-read request for
/// the open conversation, so an id is never submitted twice while a request
/// for it may still be outstanding.
#[derive(Debug)]
pub struct ReadMarkTracker {
    me: UserId,
    active_partner: Option<UserId>,
    requested: HashSet<MessageId>,
}

impl ReadMarkTracker {
    pub fn new(me: impl Into<UserId>) -> Self {
        Self {
            me: me.into(),
            active_partner: None,
            requested: HashSet::new(),
        }
    }

    pub fn active_partner(&self) -> Option<&str> {
        self.active_partner.as_deref()
    }

    /// Switch the open conversation. The requested set is cleared whenever
    /// the partner actually changes. Returns true in that case.
    pub fn set_active_partner(&mut self, partner: Option<&str>) -> bool {
        if self.active_partner.as_deref() == partner {
            return false;
        }
        debug!("Active conversation {:?} -> {:?}", self.active_partner, partner);
        self.active_partner = partner.map(str::to_string);
        self.requested.clear();
        true
    }

    pub fn is_requested(&self, id: &str) -> bool {
        self.requested.contains(id)
    }

    /// Pick the ids that belong in a mark-read request for `partner` and
    /// record them as requested.
    ///
    /// Eligible ids are unread, sent by `partner` to the current user, and not
    /// requested before. `candidates` narrows the choice to specific ids;
    /// `None` considers the whole conversation.
    pub fn select(&mut self, set: &MessageSet, partner: &str, candidates: Option<&[MessageId]>) -> Vec<MessageId> {
        self.set_active_partner(Some(partner));

        let eligible = |msg: &pulse_types::Message| {
            msg.from_id == partner && msg.is_unread_for(&self.me) && !self.requested.contains(&msg.id)
        };

        let selected: Vec<MessageId> = match candidates {
            Some(ids) => {
                let mut seen = HashSet::new();
                ids.iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .filter_map(|id| set.get(id))
                    .filter(|m| eligible(*m))
                    .map(|m| m.id.clone())
                    .collect()
            }
            None => set.iter().filter(|m| eligible(*m)).map(|m| m.id.clone()).collect(),
        };

        self.requested.extend(selected.iter().cloned());
        selected
    }

    /// Forget ids whose request failed so a later call can retry them.
    pub fn release(&mut self, ids: &[MessageId]) {
        for id in ids {
            self.requested.remove(id);
        }
    }
}
