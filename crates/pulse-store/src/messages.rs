use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use pulse_types::{Message, MessageId, PushEvent};

/// Messages for the current user, keyed by id and kept in arrival order.
///
/// Read receipts that arrive before their message are parked here and applied
/// when the message shows up, so the outcome does not depend on which source
/// wins the race.
#[derive(Debug, Clone, Default)]
pub struct MessageSet {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
    parked_reads: HashMap<MessageId, DateTime<Utc>>,
    /// Ids marked read locally that no server response has confirmed yet.
    speculative_reads: HashSet<MessageId>,
}

impl MessageSet {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&i| &self.messages[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_speculatively_read(&self, id: &str) -> bool {
        self.speculative_reads.contains(id)
    }

    /// Insert or replace by id. Returns true if the stored record changed.
    fn upsert(&mut self, mut incoming: Message) -> bool {
        if let Some(read_at) = self.parked_reads.remove(&incoming.id) {
            incoming.is_read = true;
            incoming.read_at = Some(read_at);
        }

        if incoming.is_read {
            self.speculative_reads.remove(&incoming.id);
        }

        match self.index.get(&incoming.id) {
            Some(&i) => {
                let existing = &self.messages[i];
                // Read state never goes back to unread.
                if existing.is_read && !incoming.is_read {
                    incoming.is_read = true;
                    incoming.read_at = existing.read_at;
                } else if incoming.is_read && incoming.read_at.is_none() {
                    incoming.read_at = existing.read_at;
                }
                if *existing == incoming {
                    return false;
                }
                self.messages[i] = incoming;
                true
            }
            None => {
                self.index.insert(incoming.id.clone(), self.messages.len());
                self.messages.push(incoming);
                true
            }
        }
    }

    /// Server-confirmed read. Parks the receipt if the message is unknown.
    fn confirm_read(&mut self, id: &str, read_at: DateTime<Utc>) -> bool {
        self.speculative_reads.remove(id);
        match self.index.get(id) {
            Some(&i) => {
                let msg = &mut self.messages[i];
                if msg.is_read && msg.read_at == Some(read_at) {
                    return false;
                }
                msg.is_read = true;
                msg.read_at = Some(read_at);
                true
            }
            None => {
                trace!("Parking read receipt for unknown message {}", id);
                self.parked_reads.insert(id.to_string(), read_at);
                false
            }
        }
    }
}

/// Shared, injectable message cache.
///
/// Every mutation builds the next `MessageSet` and publishes it in a single
/// watch update, so subscribers only ever observe fully reconciled snapshots.
#[derive(Clone)]
pub struct MessageStore {
    tx: Arc<watch::Sender<Arc<MessageSet>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(MessageSet::default()));
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<MessageSet> {
        self.tx.borrow().clone()
    }

    /// Observe the collection. The receiver yields a new snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<MessageSet>> {
        self.tx.subscribe()
    }

    fn modify<F>(&self, f: F) -> usize
    where
        F: FnOnce(&mut MessageSet) -> usize,
    {
        let mut changed = 0;
        self.tx.send_if_modified(|current| {
            let mut next = (**current).clone();
            changed = f(&mut next);
            if changed > 0 {
                *current = Arc::new(next);
                true
            } else {
                false
            }
        });
        changed
    }

    /// Merge the result of fetching every message for the current user.
    /// Returns the number of records that changed.
    pub fn apply_bulk_fetch(&self, messages: Vec<Message>) -> usize {
        let total = messages.len();
        let changed = self.modify(|set| messages.into_iter().map(|m| set.upsert(m)).filter(|c| *c).count());
        debug!("Bulk fetch merged {} messages ({} changed)", total, changed);
        changed
    }

    /// Apply a classified push event. Returns true if the collection changed.
    pub fn apply_push(&self, event: PushEvent) -> bool {
        let id = event.message_id().clone();
        let kind = event.kind();
        let changed = self.modify(|set| match event {
            PushEvent::Message(msg) => set.upsert(msg) as usize,
            PushEvent::MessageRead(receipt) => set.confirm_read(&receipt.message_id, receipt.read_at) as usize,
        }) > 0;
        trace!("Applied {} push for {} (changed={})", kind, id, changed);
        changed
    }

    /// Record the server's response to a local send.
    pub fn apply_sent_confirmation(&self, message: Message) -> bool {
        self.modify(|set| set.upsert(message) as usize) > 0
    }

    /// Record the server's response to a mark-read request.
    ///
    /// Only messages sent by `partner_id` are touched; ids belonging to another
    /// conversation are skipped with a warning.
    pub fn apply_read_confirmation(&self, partner_id: &str, message_ids: &[MessageId], read_at: DateTime<Utc>) -> usize {
        self.modify(|set| {
            let mut changed = 0;
            for id in message_ids {
                if let Some(msg) = set.get(id) {
                    if msg.from_id != partner_id {
                        warn!("Read confirmation for {} does not belong to partner {}", id, partner_id);
                        continue;
                    }
                }
                if set.confirm_read(id, read_at) {
                    changed += 1;
                }
            }
            changed
        })
    }

    /// Mark messages read ahead of the server. Returns the ids that actually
    /// flipped, which is what a later rollback has to revert.
    pub fn mark_read_speculative(&self, message_ids: &[MessageId]) -> Vec<MessageId> {
        let mut flipped = Vec::new();
        self.modify(|set| {
            for id in message_ids {
                let Some(&i) = set.index.get(id) else { continue };
                let msg = &mut set.messages[i];
                if msg.is_read {
                    continue;
                }
                msg.is_read = true;
                msg.read_at = None;
                set.speculative_reads.insert(id.clone());
                flipped.push(id.clone());
            }
            flipped.len()
        });
        flipped
    }

    /// Revert speculative read marks. Ids the server has confirmed in the
    /// meantime stay read.
    pub fn rollback_read_marks(&self, message_ids: &[MessageId]) -> usize {
        self.modify(|set| {
            let mut reverted = 0;
            for id in message_ids {
                if !set.speculative_reads.remove(id) {
                    continue;
                }
                if let Some(&i) = set.index.get(id) {
                    let msg = &mut set.messages[i];
                    msg.is_read = false;
                    msg.read_at = None;
                    reverted += 1;
                }
            }
            reverted
        })
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
