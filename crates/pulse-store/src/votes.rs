use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use pulse_types::{VoteDirection, VoteState, VoteTally, VoteTarget};

use crate::speculative::{Speculative, Ticket};

/// Apply one viewer vote to a tally.
///
/// Voting the same direction again removes the vote; voting the opposite
/// direction switches it, moving one count from each side in a single step.
pub fn cast_vote(tally: &VoteTally, direction: VoteDirection) -> VoteTally {
    let mut next = *tally;
    match (tally.viewer, direction) {
        (VoteState::None, VoteDirection::Up) => {
            next.upvotes += 1;
            next.viewer = VoteState::Up;
        }
        (VoteState::None, VoteDirection::Down) => {
            next.downvotes += 1;
            next.viewer = VoteState::Down;
        }
        (VoteState::Up, VoteDirection::Up) => {
            next.upvotes -= 1;
            next.viewer = VoteState::None;
        }
        (VoteState::Down, VoteDirection::Down) => {
            next.downvotes -= 1;
            next.viewer = VoteState::None;
        }
        (VoteState::Up, VoteDirection::Down) => {
            next.upvotes -= 1;
            next.downvotes += 1;
            next.viewer = VoteState::Down;
        }
        (VoteState::Down, VoteDirection::Up) => {
            next.downvotes -= 1;
            next.upvotes += 1;
            next.viewer = VoteState::Up;
        }
    }
    next
}

#[derive(Debug, thiserror::Error)]
#[error("no tally tracked for {0}")]
pub struct UnknownTarget(pub VoteTarget);

/// A vote that has been applied locally and awaits the server.
#[derive(Debug, Clone)]
pub struct PendingVote {
    ticket: Ticket<VoteTarget>,
    pub direction: VoteDirection,
    pub speculative: VoteTally,
}

impl PendingVote {
    pub fn target(&self) -> &VoteTarget {
        self.ticket.key()
    }
}

/// Vote tallies for the posts and comments the viewer has loaded.
#[derive(Clone)]
pub struct VoteStore {
    tx: Arc<watch::Sender<Speculative<VoteTarget, VoteTally>>>,
}

impl VoteStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Speculative::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Speculative<VoteTarget, VoteTally>> {
        self.tx.subscribe()
    }

    pub fn tally(&self, target: &VoteTarget) -> Option<VoteTally> {
        self.tx.borrow().get(target).copied()
    }

    /// Record a tally the server reported, e.g. when a post is loaded.
    pub fn seed(&self, target: VoteTarget, tally: VoteTally) {
        self.tx.send_modify(|book| book.seed(target, tally));
    }

    /// Apply `direction` locally before the network call.
    pub fn begin(&self, target: VoteTarget, direction: VoteDirection) -> Result<PendingVote, UnknownTarget> {
        let mut started = None;
        self.tx.send_if_modified(|book| {
            started = book.begin(target.clone(), |tally| cast_vote(tally, direction));
            started.is_some()
        });

        let (ticket, speculative) = started.ok_or(UnknownTarget(target))?;
        debug!(
            "Speculative {} vote on {}: up={} down={}",
            direction.as_str(),
            ticket.key(),
            speculative.upvotes,
            speculative.downvotes
        );
        Ok(PendingVote {
            ticket,
            direction,
            speculative,
        })
    }

    /// Accept the server's tally for a vote that succeeded.
    pub fn commit(&self, pending: &PendingVote, authoritative: VoteTally) -> Option<VoteTally> {
        let mut shown = None;
        self.tx.send_if_modified(|book| {
            shown = book.commit(&pending.ticket, authoritative);
            shown.is_some()
        });
        if let Some(tally) = shown {
            if tally != pending.speculative {
                debug!("Server corrected speculative vote on {}", pending.target());
            }
        }
        shown
    }

    /// Restore the tally as it was before `pending` was applied.
    pub fn rollback(&self, pending: &PendingVote) -> Option<VoteTally> {
        let mut restored = None;
        self.tx.send_if_modified(|book| {
            restored = book.rollback(&pending.ticket);
            restored.is_some()
        });
        if restored.is_some() {
            warn!("Rolled back {} vote on {}", pending.direction.as_str(), pending.target());
        }
        restored
    }
}

impl Default for VoteStore {
    fn default() -> Self {
        Self::new()
    }
}
