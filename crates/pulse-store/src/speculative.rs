use std::collections::HashMap;
use std::hash::Hash;

/// Handle for one in-flight speculative transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket<K> {
    key: K,
    seq: u64,
}

impl<K> Ticket<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

#[derive(Debug, Clone)]
struct Pending<S> {
    seq: u64,
    /// State to restore if this transition fails.
    snapshot: S,
}

/// Keyed state that can be changed ahead of confirmation.
///
/// `begin` applies a transition immediately and remembers the prior state.
/// Transitions on the same key stack: each one starts from the state the
/// previous one produced, so rapid repeats never compute from stale data.
///
/// - `commit` with the server's value: if nothing later is pending, the value
///   becomes the current state; otherwise it becomes the rollback point of
///   the next pending transition.
/// - `rollback`: restores the ticket's snapshot verbatim. Later transitions
///   on the key fall back to that same snapshot.
/// - Responses may arrive in any order. Once a ticket commits, older tickets
///   on the same key resolve without touching the shown state.
#[derive(Debug, Clone)]
pub struct Speculative<K, S> {
    values: HashMap<K, S>,
    pending: HashMap<K, Vec<Pending<S>>>,
    /// Newest committed seq per key while older tickets may still resolve.
    confirmed: HashMap<K, u64>,
    next_seq: u64,
}

impl<K, S> Speculative<K, S>
where
    K: Eq + Hash + Clone,
    S: Clone,
{
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            pending: HashMap::new(),
            confirmed: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn get(&self, key: &K) -> Option<&S> {
        self.values.get(key)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.get(key).is_some_and(|p| !p.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &S)> {
        self.values.iter()
    }

    /// Record server state learned outside a transition (for example from a
    /// page load). While transitions are pending the displayed state is kept
    /// and the value becomes the oldest rollback point instead.
    pub fn seed(&mut self, key: K, value: S) {
        match self.pending.get_mut(&key).and_then(|p| p.first_mut()) {
            Some(oldest) => oldest.snapshot = value,
            None => {
                self.values.insert(key, value);
            }
        }
    }

    /// Apply `transition` to the current state for `key`. Returns `None` if
    /// the key has never been seeded.
    pub fn begin<F>(&mut self, key: K, transition: F) -> Option<(Ticket<K>, S)>
    where
        F: FnOnce(&S) -> S,
    {
        let current = self.values.get(&key)?;
        let next = transition(current);
        let snapshot = current.clone();

        let seq = self.next_seq;
        self.next_seq += 1;

        self.pending
            .entry(key.clone())
            .or_default()
            .push(Pending { seq, snapshot });
        self.values.insert(key.clone(), next.clone());

        Some((Ticket { key, seq }, next))
    }

    /// Resolve a ticket successfully. Returns the state now shown for the key,
    /// or `None` if the ticket was already resolved.
    ///
    /// A ticket older than one that already committed carries stale server
    /// state; it is discarded and the shown state is left alone.
    pub fn commit(&mut self, ticket: &Ticket<K>, authoritative: S) -> Option<S> {
        let superseded = self.is_superseded(ticket);
        let stack = self.pending.get_mut(&ticket.key)?;
        let pos = stack.iter().position(|p| p.seq == ticket.seq)?;
        stack.remove(pos);

        if !superseded {
            if pos < stack.len() {
                stack[pos].snapshot = authoritative;
            } else {
                self.values.insert(ticket.key.clone(), authoritative);
            }
            self.confirmed.insert(ticket.key.clone(), ticket.seq);
        }
        self.prune(&ticket.key);
        self.values.get(&ticket.key).cloned()
    }

    /// Resolve a ticket as failed and restore the state it replaced. Returns
    /// the state now shown for the key.
    ///
    /// If a later ticket has already committed, its server state stands and
    /// the failed ticket is simply dropped.
    pub fn rollback(&mut self, ticket: &Ticket<K>) -> Option<S> {
        let superseded = self.is_superseded(ticket);
        let stack = self.pending.get_mut(&ticket.key)?;
        let pos = stack.iter().position(|p| p.seq == ticket.seq)?;
        let failed = stack.remove(pos);

        if !superseded {
            for later in stack.iter_mut().skip(pos) {
                later.snapshot = failed.snapshot.clone();
            }
            self.values.insert(ticket.key.clone(), failed.snapshot);
        }
        self.prune(&ticket.key);
        self.values.get(&ticket.key).cloned()
    }

    fn is_superseded(&self, ticket: &Ticket<K>) -> bool {
        self.confirmed.get(&ticket.key).is_some_and(|&seq| seq > ticket.seq)
    }

    fn prune(&mut self, key: &K) {
        if self.pending.get(key).is_some_and(|p| p.is_empty()) {
            self.pending.remove(key);
            self.confirmed.remove(key);
        }
    }
}

impl<K, S> Default for Speculative<K, S>
where
    K: Eq + Hash + Clone,
    S: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
