use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message as Frame;

use pulse_api::{ApiError, Backend};
use pulse_client::{MessagingSession, SyncError};
use pulse_gateway::{BackoffPolicy, ConnectionState, GatewayConfig};
use pulse_types::api::MarkReadResponse;
use pulse_types::{Message, MessageId, Session, VoteDirection, VoteState, VoteTally, VoteTarget};

// -- Scripted backend --

#[derive(Default)]
struct Script {
    fetch: Mutex<VecDeque<Result<Vec<Message>, ApiError>>>,
    send: Mutex<VecDeque<Result<Message, ApiError>>>,
    mark_read: Mutex<VecDeque<Result<MarkReadResponse, ApiError>>>,
    vote: Mutex<VecDeque<Result<VoteTally, ApiError>>>,
    mark_read_calls: Mutex<Vec<Vec<MessageId>>>,
    hold_mark_read: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[derive(Clone, Default)]
struct MockBackend {
    script: Arc<Script>,
}

fn unscripted<T>() -> Result<T, ApiError> {
    Err(ApiError::Status {
        status: 500,
        body: "unscripted call".into(),
    })
}

impl Backend for MockBackend {
    async fn fetch_messages(&self, _user_id: &str) -> Result<Vec<Message>, ApiError> {
        self.script.fetch.lock().pop_front().unwrap_or_else(unscripted)
    }

    async fn send_message(&self, _to_id: &str, _content: &str) -> Result<Message, ApiError> {
        self.script.send.lock().pop_front().unwrap_or_else(unscripted)
    }

    async fn mark_read(&self, _partner_id: &str, message_ids: &[MessageId]) -> Result<MarkReadResponse, ApiError> {
        self.script.mark_read_calls.lock().push(message_ids.to_vec());
        if self.script.hold_mark_read.load(Ordering::SeqCst) {
            self.script.entered.notify_one();
            self.script.release.notified().await;
        }
        self.script.mark_read.lock().pop_front().unwrap_or_else(unscripted)
    }

    async fn vote(&self, _target: &VoteTarget, _direction: VoteDirection) -> Result<VoteTally, ApiError> {
        self.script.vote.lock().pop_front().unwrap_or_else(unscripted)
    }
}

// -- Helpers --

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
}

fn msg(id: &str, from: &str, to: &str, minute: u32) -> Message {
    Message {
        id: id.into(),
        from_id: from.into(),
        to_id: to.into(),
        content: format!("hello from {}", from),
        created_at: at(minute),
        is_read: false,
        read_at: None,
    }
}

fn session_as_b() -> (MessagingSession<MockBackend>, Arc<Script>) {
    let backend = MockBackend::default();
    let script = backend.script.clone();
    let session = MessagingSession::new(Session::new("B", "tok-b"), backend).unwrap();
    (session, script)
}

async fn loaded_session(messages: Vec<Message>) -> (MessagingSession<MockBackend>, Arc<Script>) {
    let (session, script) = session_as_b();
    script.fetch.lock().push_back(Ok(messages));
    session.refresh().await.unwrap();
    (session, script)
}

fn post_x() -> VoteTarget {
    VoteTarget::Post("x".into())
}

// -- Session --

#[test]
fn incomplete_session_is_not_logged_in() {
    let result = MessagingSession::new(Session::new("", "tok"), MockBackend::default());
    assert!(matches!(result, Err(SyncError::NotLoggedIn)));
    let result = MessagingSession::new(Session::new("B", " "), MockBackend::default());
    assert!(matches!(result, Err(SyncError::NotLoggedIn)));
}

#[tokio::test]
async fn refresh_builds_conversations() {
    let (session, _) = loaded_session(vec![
        msg("m1", "A", "B", 0),
        msg("m2", "B", "A", 1),
        msg("m3", "C", "B", 5),
    ])
    .await;

    let convos = session.conversations();
    assert_eq!(convos.len(), 2);
    assert_eq!(convos[0].partner_id, "C");
    assert_eq!(convos[1].partner_id, "A");
    assert_eq!(convos[1].unread, 1);

    let with_a: Vec<_> = session.conversation_with("A").into_iter().map(|m| m.id).collect();
    assert_eq!(with_a, vec!["m2", "m1"]);
}

#[tokio::test]
async fn send_lands_in_store_once() {
    let (session, script) = session_as_b();
    let sent = msg("m9", "B", "A", 3);
    script.send.lock().push_back(Ok(sent.clone()));

    let echoed = session.send("A", "hello from B").await.unwrap();
    assert_eq!(echoed, sent);
    assert_eq!(session.snapshot().len(), 1);
    assert_eq!(session.snapshot().get("m9"), Some(&sent));
}

#[tokio::test]
async fn failed_send_changes_nothing() {
    let (session, _) = session_as_b();
    let err = session.send("A", "hi").await.unwrap_err();
    assert!(matches!(err, SyncError::SendFailed(_)));
    assert!(session.snapshot().is_empty());
    assert!(!*session.session_ended().borrow());
}

// -- Read marks --

#[tokio::test]
async fn mark_read_is_never_submitted_twice_while_outstanding() {
    let (session, script) = loaded_session(vec![
        msg("m1", "A", "B", 0),
        msg("m2", "A", "B", 1),
        msg("m3", "B", "A", 2),
        msg("m4", "C", "B", 3),
    ])
    .await;
    script.hold_mark_read.store(true, Ordering::SeqCst);
    script.mark_read.lock().push_back(Ok(MarkReadResponse {
        message_ids: vec!["m1".into(), "m2".into()],
        read_at: at(30),
    }));

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.mark_read("A", None).await }
    });
    script.entered.notified().await;

    // Speculative marks are visible while the request is in flight.
    let snapshot = session.snapshot();
    assert!(snapshot.get("m1").unwrap().is_read);
    assert!(snapshot.get("m2").unwrap().is_read);
    assert!(!snapshot.get("m4").unwrap().is_read);

    let second = session.mark_read("A", None).await.unwrap();
    assert!(second.is_empty());

    script.release.notify_one();
    let confirmed = first.await.unwrap().unwrap();
    assert_eq!(confirmed, vec!["m1", "m2"]);

    assert_eq!(script.mark_read_calls.lock().len(), 1);
    let m1 = session.snapshot().get("m1").cloned().unwrap();
    assert_eq!(m1.read_at, Some(at(30)));
    assert!(!session.snapshot().is_speculatively_read("m1"));
}

#[tokio::test]
async fn failed_mark_read_reverts_and_can_retry() {
    let (session, script) = loaded_session(vec![msg("m1", "A", "B", 0)]).await;
    script.mark_read.lock().push_back(Err(ApiError::Status {
        status: 503,
        body: "busy".into(),
    }));

    let err = session.mark_read("A", None).await.unwrap_err();
    assert!(matches!(err, SyncError::MarkReadFailed(_)));
    assert!(!session.snapshot().get("m1").unwrap().is_read);

    script.mark_read.lock().push_back(Ok(MarkReadResponse {
        message_ids: vec!["m1".into()],
        read_at: at(7),
    }));
    let ids = session.mark_read("A", None).await.unwrap();
    assert_eq!(ids, vec!["m1"]);
    assert_eq!(session.snapshot().get("m1").unwrap().read_at, Some(at(7)));
    assert_eq!(script.mark_read_calls.lock().len(), 2);
}

#[tokio::test]
async fn ids_left_out_of_confirmation_revert_and_can_retry() {
    let (session, script) = loaded_session(vec![msg("m1", "A", "B", 0), msg("m2", "A", "B", 1)]).await;
    script.mark_read.lock().push_back(Ok(MarkReadResponse {
        message_ids: vec!["m1".into()],
        read_at: at(20),
    }));

    let confirmed = session.mark_read("A", None).await.unwrap();
    assert_eq!(confirmed, vec!["m1"]);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.get("m1").unwrap().read_at, Some(at(20)));
    assert!(!snapshot.get("m2").unwrap().is_read);
    assert!(!snapshot.is_speculatively_read("m2"));
    assert_eq!(session.conversations()[0].unread, 1);

    script.mark_read.lock().push_back(Ok(MarkReadResponse {
        message_ids: vec!["m2".into()],
        read_at: at(21),
    }));
    let retried = session.mark_read("A", None).await.unwrap();
    assert_eq!(retried, vec!["m2"]);
    assert_eq!(script.mark_read_calls.lock().last().unwrap(), &vec![MessageId::from("m2")]);
    assert_eq!(session.snapshot().get("m2").unwrap().read_at, Some(at(21)));
}

// -- Votes --

#[tokio::test]
async fn vote_confirmed_by_server() {
    let (session, script) = session_as_b();
    session.seed_tally(post_x(), VoteTally::new(5, 2, VoteState::None));
    script.vote.lock().push_back(Ok(VoteTally::new(6, 2, VoteState::Up)));

    let mut votes = session.votes();
    let call = tokio::spawn({
        let session = session.clone();
        async move { session.vote(post_x(), VoteDirection::Up).await }
    });

    let final_tally = call.await.unwrap().unwrap();
    assert_eq!(final_tally, VoteTally::new(6, 2, VoteState::Up));
    assert_eq!(session.tally(&post_x()), Some(final_tally));
    assert!(votes.has_changed().unwrap());
    assert!(!votes.borrow_and_update().is_pending(&post_x()));
}

#[tokio::test]
async fn server_tally_overrides_speculation() {
    let (session, script) = session_as_b();
    session.seed_tally(post_x(), VoteTally::new(5, 2, VoteState::None));
    // Someone else voted in the meantime.
    script.vote.lock().push_back(Ok(VoteTally::new(8, 2, VoteState::Up)));

    let tally = session.vote(post_x(), VoteDirection::Up).await.unwrap();
    assert_eq!(tally.karma(), 6);
    assert_eq!(session.tally(&post_x()), Some(VoteTally::new(8, 2, VoteState::Up)));
}

#[tokio::test]
async fn failed_vote_restores_snapshot() {
    let (session, script) = session_as_b();
    let before = VoteTally::new(5, 2, VoteState::None);
    session.seed_tally(post_x(), before);
    script.vote.lock().push_back(Err(ApiError::Status {
        status: 500,
        body: "boom".into(),
    }));

    let err = session.vote(post_x(), VoteDirection::Up).await.unwrap_err();
    assert!(matches!(err, SyncError::VoteFailed(_)));
    assert_eq!(session.tally(&post_x()), Some(before));
}

#[tokio::test]
async fn vote_conflict_rolls_back() {
    let (session, script) = session_as_b();
    let before = VoteTally::new(6, 2, VoteState::Up);
    session.seed_tally(post_x(), before);
    script.vote.lock().push_back(Err(ApiError::Conflict("already voted".into())));

    let err = session.vote(post_x(), VoteDirection::Down).await.unwrap_err();
    assert!(matches!(err, SyncError::VoteConflict(ref t) if *t == post_x()));
    assert_eq!(session.tally(&post_x()), Some(before));
    assert!(!*session.session_ended().borrow());
}

#[tokio::test]
async fn vote_on_unloaded_target_records_server_tally() {
    let (session, script) = session_as_b();
    let comment = VoteTarget::Comment("c1".into());
    let server = VoteTally::new(3, 0, VoteState::Up);
    script.vote.lock().push_back(Ok(server));

    let tally = session.vote(comment.clone(), VoteDirection::Up).await.unwrap();
    assert_eq!(tally, server);
    assert!(script.vote.lock().is_empty());
    assert_eq!(session.tally(&comment), Some(server));
    assert!(!session.votes().borrow().is_pending(&comment));
}

#[tokio::test]
async fn failed_vote_on_unloaded_target_leaves_nothing_behind() {
    let (session, script) = session_as_b();
    let comment = VoteTarget::Comment("c1".into());
    script.vote.lock().push_back(Err(ApiError::Conflict("already voted".into())));

    let err = session.vote(comment.clone(), VoteDirection::Down).await.unwrap_err();
    assert!(matches!(err, SyncError::VoteConflict(ref t) if *t == comment));
    assert_eq!(session.tally(&comment), None);
}

#[tokio::test]
async fn vote_without_an_id_is_rejected() {
    let (session, script) = session_as_b();
    script.vote.lock().push_back(Ok(VoteTally::new(1, 0, VoteState::Up)));
    let blank = VoteTarget::Post(" ".into());

    let err = session.vote(blank.clone(), VoteDirection::Up).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownTarget(t) if t == blank));
    assert_eq!(script.vote.lock().len(), 1);
}

#[tokio::test]
async fn toggling_returns_to_baseline() {
    let (session, script) = session_as_b();
    let baseline = VoteTally::new(5, 2, VoteState::None);
    session.seed_tally(post_x(), baseline);
    script.vote.lock().push_back(Ok(VoteTally::new(6, 2, VoteState::Up)));
    script.vote.lock().push_back(Ok(VoteTally::new(5, 3, VoteState::Down)));
    script.vote.lock().push_back(Ok(VoteTally::new(5, 2, VoteState::None)));

    let up = session.vote(post_x(), VoteDirection::Up).await.unwrap();
    let down = session.vote(post_x(), VoteDirection::Down).await.unwrap();
    assert_eq!(down.karma() - up.karma(), -2);
    let cleared = session.vote(post_x(), VoteDirection::Down).await.unwrap();
    assert_eq!(cleared, baseline);
}

// -- Auth --

#[tokio::test]
async fn unauthorized_response_ends_session() {
    let (session, script) = session_as_b();
    script.send.lock().push_back(Err(ApiError::Unauthorized(401)));
    let mut ended = session.session_ended();

    let err = session.send("A", "hi").await.unwrap_err();
    assert!(matches!(err, SyncError::SendFailed(ApiError::Unauthorized(401))));
    assert!(*ended.borrow_and_update());

    assert!(matches!(session.refresh().await, Err(SyncError::SessionEnded)));
    assert!(matches!(session.vote(post_x(), VoteDirection::Up).await, Err(SyncError::SessionEnded)));
    assert!(matches!(
        session.start_realtime(GatewayConfig::new("ws://127.0.0.1:9")),
        Err(SyncError::SessionEnded)
    ));
}

// -- Realtime --

fn fast_gateway(addr: std::net::SocketAddr) -> GatewayConfig {
    GatewayConfig {
        backoff: BackoffPolicy {
            base: Duration::from_millis(20),
            max: Duration::from_millis(100),
            max_attempts: None,
        },
        ..GatewayConfig::new(format!("ws://{}", addr))
    }
}

#[tokio::test]
async fn push_receipt_after_bulk_fetch() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(Frame::Text(
            r#"{"type":"messageRead","messageId":"m1","readAt":"2024-05-01T10:01:00Z"}"#.into(),
        ))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (session, _) = loaded_session(vec![msg("m1", "B", "A", 0)]).await;

    let mut messages = session.messages();
    let mut status = session.connection_state();
    session.start_realtime(fast_gateway(addr)).unwrap();

    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.state == ConnectionState::Open))
        .await
        .expect("never opened")
        .unwrap();
    let set = tokio::time::timeout(
        Duration::from_secs(5),
        messages.wait_for(|set| set.get("m1").is_some_and(|m| m.is_read)),
    )
    .await
    .expect("receipt never applied")
    .unwrap()
    .clone();

    assert_eq!(set.len(), 1);
    assert_eq!(set.get("m1").unwrap().read_at, Some(at(1)));

    session.stop_realtime();
    assert_eq!(session.connection_state().borrow().state, ConnectionState::Idle);
}

#[tokio::test]
async fn rejected_upgrade_ends_session() {
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::http::StatusCode;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let _ = tokio_tungstenite::accept_hdr_async(tcp, |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
            let mut err = ErrorResponse::new(Some("expired".to_string()));
            *err.status_mut() = StatusCode::FORBIDDEN;
            Err(err)
        })
        .await;
    });

    let (session, _) = session_as_b();
    let mut ended = session.session_ended();
    session.start_realtime(fast_gateway(addr)).unwrap();

    tokio::time::timeout(Duration::from_secs(5), ended.wait_for(|ended| *ended))
        .await
        .expect("session never ended")
        .unwrap();
    assert_eq!(session.connection_state().borrow().state, ConnectionState::Idle);
}
