use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulse_api::{ApiError, Backend};
use pulse_gateway::{ConnectionStatus, Gateway, GatewayConfig, GatewaySignal};
use pulse_store::{Conversation, MessageSet, MessageStore, ReadMarkTracker, Speculative, VoteStore};
use pulse_types::{Message, MessageId, Session, VoteDirection, VoteTally, VoteTarget};

use crate::error::SyncError;

struct Realtime {
    gateway: Gateway,
    pump: JoinHandle<()>,
}

struct Inner<B> {
    session: Session,
    backend: B,
    store: MessageStore,
    votes: VoteStore,
    read_marks: Mutex<ReadMarkTracker>,
    realtime: Mutex<Option<Realtime>>,
    status_tx: watch::Sender<ConnectionStatus>,
    ended_tx: watch::Sender<bool>,
}

impl<B> Inner<B> {
    fn is_ended(&self) -> bool {
        *self.ended_tx.borrow()
    }

    fn end(&self, reason: &str) {
        let first = self.ended_tx.send_if_modified(|ended| {
            if *ended {
                return false;
            }
            *ended = true;
            true
        });
        if first {
            info!("Session for {} ended: {}", self.session.user_id, reason);
        }
        self.stop_realtime();
    }

    fn stop_realtime(&self) {
        if let Some(realtime) = self.realtime.lock().take() {
            realtime.gateway.shutdown();
            realtime.pump.abort();
        }
        self.status_tx.send_replace(ConnectionStatus::default());
    }
}

impl<B> Drop for Inner<B> {
    fn drop(&mut self) {
        if let Some(realtime) = self.realtime.get_mut().take() {
            realtime.gateway.shutdown();
            realtime.pump.abort();
        }
    }
}

/// One logged-in user's view of their messages and votes.
///
/// Cloning is cheap; clones share the same stores and connection. Local
/// actions go to the backend and reconcile into the stores; push events from
/// the gateway are applied as they arrive. A 401/403 from either side ends
/// the session: the connection is torn down and `session_ended()` flips.
pub struct MessagingSession<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for MessagingSession<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Backend> MessagingSession<B> {
    pub fn new(session: Session, backend: B) -> Result<Self, SyncError> {
        if !session.is_complete() {
            return Err(SyncError::NotLoggedIn);
        }
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let (ended_tx, _) = watch::channel(false);
        let inner = Inner {
            read_marks: Mutex::new(ReadMarkTracker::new(session.user_id.clone())),
            session,
            backend,
            store: MessageStore::new(),
            votes: VoteStore::new(),
            realtime: Mutex::new(None),
            status_tx,
            ended_tx,
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn user_id(&self) -> &str {
        &self.inner.session.user_id
    }

    fn ensure_active(&self) -> Result<(), SyncError> {
        if self.inner.is_ended() {
            return Err(SyncError::SessionEnded);
        }
        Ok(())
    }

    /// End the session if the backend rejected the credential, then wrap.
    fn api_failure(&self, err: ApiError, wrap: fn(ApiError) -> SyncError) -> SyncError {
        if err.is_auth_failure() {
            self.inner.end("backend rejected the credential");
        }
        wrap(err)
    }

    // -- Observables --

    pub fn messages(&self) -> watch::Receiver<Arc<MessageSet>> {
        self.inner.store.subscribe()
    }

    pub fn snapshot(&self) -> Arc<MessageSet> {
        self.inner.store.snapshot()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        pulse_store::conversations(&self.snapshot(), self.user_id())
    }

    pub fn conversation_with(&self, partner: &str) -> Vec<Message> {
        pulse_store::conversation_with(&self.snapshot(), self.user_id(), partner)
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn votes(&self) -> watch::Receiver<Speculative<VoteTarget, VoteTally>> {
        self.inner.votes.subscribe()
    }

    pub fn tally(&self, target: &VoteTarget) -> Option<VoteTally> {
        self.inner.votes.tally(target)
    }

    /// Becomes true once, when the session ends for any reason.
    pub fn session_ended(&self) -> watch::Receiver<bool> {
        self.inner.ended_tx.subscribe()
    }

    // -- Lifecycle --

    /// Open the push connection. Calling again while it runs only re-issues
    /// `connect`, which the gateway ignores while a connection is up.
    pub fn start_realtime(&self, config: GatewayConfig) -> Result<(), SyncError> {
        self.ensure_active()?;
        let mut realtime = self.inner.realtime.lock();
        if let Some(running) = realtime.as_ref() {
            running.gateway.connect(self.inner.session.clone());
            return Ok(());
        }

        info!("Starting realtime for {} via {}", self.user_id(), config.url);
        let (gateway, signals) = Gateway::spawn(config);
        let status = gateway.status();
        gateway.connect(self.inner.session.clone());
        let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), signals, status));
        *realtime = Some(Realtime { gateway, pump });
        Ok(())
    }

    /// Close the push connection but keep the session.
    pub fn stop_realtime(&self) {
        self.inner.stop_realtime();
    }

    /// Log out locally: tear the connection down and signal the end.
    pub fn end_session(&self) {
        self.inner.end("ended locally");
    }

    // -- Actions --

    /// Load every message for the current user into the store.
    pub async fn refresh(&self) -> Result<usize, SyncError> {
        self.ensure_active()?;
        match self.inner.backend.fetch_messages(self.user_id()).await {
            Ok(messages) => Ok(self.inner.store.apply_bulk_fetch(messages)),
            Err(e) => Err(self.api_failure(e, SyncError::FetchFailed)),
        }
    }

    pub async fn send(&self, to_id: &str, content: &str) -> Result<Message, SyncError> {
        self.ensure_active()?;
        match self.inner.backend.send_message(to_id, content).await {
            Ok(message) => {
                self.inner.store.apply_sent_confirmation(message.clone());
                debug!("Sent {} to {}", message.id, to_id);
                Ok(message)
            }
            Err(e) => {
                warn!("Send to {} failed: {}", to_id, e);
                Err(self.api_failure(e, SyncError::SendFailed))
            }
        }
    }

    /// Switch the open conversation; `None` closes it.
    pub fn open_conversation(&self, partner: Option<&str>) {
        self.inner.read_marks.lock().set_active_partner(partner);
    }

    /// Mark `partner`'s unread messages to this user as read. `ids` narrows
    /// the request to specific messages.
    ///
    /// Marks show immediately. Ids already requested are skipped, so an empty
    /// result means there was nothing left to submit. On failure the marks
    /// are reverted and the ids become eligible again.
    pub async fn mark_read(&self, partner: &str, ids: Option<&[MessageId]>) -> Result<Vec<MessageId>, SyncError> {
        self.ensure_active()?;
        let selected = {
            let snapshot = self.inner.store.snapshot();
            self.inner.read_marks.lock().select(&snapshot, partner, ids)
        };
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let flipped = self.inner.store.mark_read_speculative(&selected);
        match self.inner.backend.mark_read(partner, &selected).await {
            Ok(resp) => {
                self.inner
                    .store
                    .apply_read_confirmation(partner, &resp.message_ids, resp.read_at);

                // Ids the server left out were not marked; undo them and allow a retry.
                let unconfirmed: Vec<MessageId> = selected
                    .iter()
                    .filter(|id| !resp.message_ids.contains(id))
                    .cloned()
                    .collect();
                if !unconfirmed.is_empty() {
                    let reverted = self.inner.store.rollback_read_marks(&unconfirmed);
                    self.inner.read_marks.lock().release(&unconfirmed);
                    debug!(
                        "Server confirmed {} of {} read marks for {}, reverted {}",
                        resp.message_ids.len(),
                        selected.len(),
                        partner,
                        reverted
                    );
                }
                Ok(resp.message_ids)
            }
            Err(e) => {
                let reverted = self.inner.store.rollback_read_marks(&flipped);
                self.inner.read_marks.lock().release(&selected);
                warn!(
                    "Mark-read for {} failed, reverted {} of {} marks: {}",
                    partner,
                    reverted,
                    selected.len(),
                    e
                );
                Err(self.api_failure(e, SyncError::MarkReadFailed))
            }
        }
    }

    /// Record a tally the server reported, e.g. when a post is loaded.
    pub fn seed_tally(&self, target: VoteTarget, tally: VoteTally) {
        self.inner.votes.seed(target, tally);
    }

    /// Vote on a post or comment. Voting the current direction again removes
    /// the vote; the opposite direction switches it.
    ///
    /// With a tally loaded, the new tally shows immediately. It is replaced by
    /// the server's on success and restored to what it was on failure. Without
    /// one, the call goes straight to the server and its tally is recorded.
    pub async fn vote(&self, target: VoteTarget, direction: VoteDirection) -> Result<VoteTally, SyncError> {
        self.ensure_active()?;
        if target.id().trim().is_empty() {
            return Err(SyncError::UnknownTarget(target));
        }
        let pending = match self.inner.votes.begin(target.clone(), direction) {
            Ok(pending) => Some(pending),
            Err(_) => {
                debug!("No tally loaded for {}, voting without speculation", target);
                None
            }
        };

        match self.inner.backend.vote(&target, direction).await {
            Ok(tally) => match pending {
                Some(pending) => Ok(self.inner.votes.commit(&pending, tally).unwrap_or(tally)),
                None => {
                    self.inner.votes.seed(target, tally);
                    Ok(tally)
                }
            },
            Err(e) => {
                if let Some(pending) = &pending {
                    self.inner.votes.rollback(pending);
                }
                if e.is_conflict() {
                    warn!("Vote on {} conflicts with the server: {}", target, e);
                    return Err(SyncError::VoteConflict(target));
                }
                Err(self.api_failure(e, SyncError::VoteFailed))
            }
        }
    }
}

/// Feeds gateway output into the session until the gateway stops or the
/// session is dropped.
async fn pump<B>(
    session: Weak<Inner<B>>,
    mut signals: mpsc::UnboundedReceiver<GatewaySignal>,
    mut status: watch::Receiver<ConnectionStatus>,
) where
    B: Send + Sync + 'static,
{
    loop {
        tokio::select! {
            signal = signals.recv() => {
                let Some(signal) = signal else { break };
                let Some(inner) = session.upgrade() else { break };
                match signal {
                    GatewaySignal::Push(event) => {
                        inner.store.apply_push(event);
                    }
                    GatewaySignal::AuthRejected => {
                        inner.end("push channel rejected the credential");
                        break;
                    }
                    GatewaySignal::GaveUp { attempts } => {
                        warn!("Realtime gave up after {} reconnect attempts", attempts);
                    }
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                let Some(inner) = session.upgrade() else { break };
                inner.status_tx.send_replace(current);
            }
        }
    }
    debug!("Realtime pump stopped");
}
