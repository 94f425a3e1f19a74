use std::time::Duration;

use tracing::{debug, info, warn};

use pulse_types::Session;

/// Identity of one connection attempt or reconnect timer. Events carrying an
/// id that is no longer current come from a superseded instance and are dropped.
pub type InstanceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Observable connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempt: u32,
    /// Reconnection stopped because the attempt cap was reached.
    pub gave_up: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            reconnect_attempt: 0,
            gave_up: false,
        }
    }
}

/// Exponential reconnect delay: `min(base * 2^attempt, max)`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    None,
    /// Open a socket for `instance` using `session`'s credential.
    Dial { instance: InstanceId, session: Session },
    /// Fire `reconnect_due(instance)` after `delay`.
    ScheduleReconnect { instance: InstanceId, delay: Duration },
    /// Close whatever socket is open and forget pending timers.
    Teardown,
    /// The backend refused the credential.
    AuthRejected,
    /// Reconnect cap reached.
    GiveUp { attempts: u32 },
}

/// Connection lifecycle as an explicit state machine.
///
/// `Idle -> Connecting -> Open -> Closed -> Connecting ...`
///
/// Performs no I/O. The driver feeds it transport callbacks tagged with the
/// instance they belong to and executes the returned `Command`.
#[derive(Debug)]
pub struct ConnectionMachine {
    policy: BackoffPolicy,
    state: ConnectionState,
    attempt: u32,
    gave_up: bool,
    session: Option<Session>,
    /// Socket instance whose events are accepted.
    current: Option<InstanceId>,
    /// Reconnect timer whose expiry is accepted.
    pending_reconnect: Option<InstanceId>,
    next_instance: InstanceId,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Idle,
            attempt: 0,
            gave_up: false,
            session: None,
            current: None,
            pending_reconnect: None,
            next_instance: 1,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            reconnect_attempt: self.attempt,
            gave_up: self.gave_up,
        }
    }

    /// True if frames from `instance` should be routed.
    pub fn accepts(&self, instance: InstanceId) -> bool {
        self.state == ConnectionState::Open && self.current == Some(instance)
    }

    fn allocate(&mut self) -> InstanceId {
        let id = self.next_instance;
        self.next_instance += 1;
        id
    }

    fn dial(&mut self) -> Command {
        let Some(session) = self.session.clone() else {
            return Command::None;
        };
        let instance = self.allocate();
        self.current = Some(instance);
        self.pending_reconnect = None;
        self.state = ConnectionState::Connecting;
        debug!("Dialing gateway (instance {}, attempt {})", instance, self.attempt);
        Command::Dial { instance, session }
    }

    /// Start a connection for `session`.
    ///
    /// An incomplete session tears down any existing connection. While an
    /// attempt or open connection exists for the same session this is a no-op.
    pub fn connect(&mut self, session: Session) -> Command {
        if !session.is_complete() {
            debug!("Session incomplete, tearing down gateway connection");
            return self.disconnect();
        }

        let same_session = self.session.as_ref() == Some(&session);
        let in_flight = matches!(self.state, ConnectionState::Connecting | ConnectionState::Open);
        if same_session && in_flight {
            return Command::None;
        }

        if !same_session && self.session.is_some() {
            info!("Session changed, replacing gateway connection");
        }
        self.session = Some(session);
        self.attempt = 0;
        self.gave_up = false;
        self.dial()
    }

    /// Drop the session and close the connection.
    pub fn disconnect(&mut self) -> Command {
        self.session = None;
        self.current = None;
        self.pending_reconnect = None;
        self.attempt = 0;
        self.gave_up = false;
        self.state = ConnectionState::Idle;
        Command::Teardown
    }

    pub fn opened(&mut self, instance: InstanceId) -> Command {
        if self.current != Some(instance) || self.state != ConnectionState::Connecting {
            debug!("Ignoring open from stale instance {}", instance);
            return Command::None;
        }
        info!("Gateway connection open (instance {})", instance);
        self.state = ConnectionState::Open;
        self.attempt = 0;
        Command::None
    }

    /// The socket for `instance` closed or failed to connect. `abnormal` is
    /// false only for a clean close initiated by the server.
    pub fn closed(&mut self, instance: InstanceId, abnormal: bool) -> Command {
        if self.current != Some(instance) {
            debug!("Ignoring close from stale instance {}", instance);
            return Command::None;
        }
        self.current = None;
        self.state = ConnectionState::Closed;

        if !abnormal {
            info!("Gateway closed normally (instance {})", instance);
            return Command::None;
        }

        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                warn!("Giving up on gateway after {} reconnect attempts", self.attempt);
                self.gave_up = true;
                return Command::GiveUp { attempts: self.attempt };
            }
        }

        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        let timer = self.allocate();
        self.pending_reconnect = Some(timer);
        info!("Gateway dropped, reconnecting in {:?} (attempt {})", delay, self.attempt);
        Command::ScheduleReconnect { instance: timer, delay }
    }

    pub fn reconnect_due(&mut self, timer: InstanceId) -> Command {
        if self.pending_reconnect != Some(timer) {
            debug!("Ignoring stale reconnect timer {}", timer);
            return Command::None;
        }
        self.dial()
    }

    /// The backend rejected the credential for `instance`.
    pub fn auth_failed(&mut self, instance: InstanceId) -> Command {
        if self.current != Some(instance) {
            return Command::None;
        }
        warn!("Gateway rejected credential, ending session");
        self.disconnect();
        Command::AuthRejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("B", "token-b")
    }

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(BackoffPolicy::default())
    }

    fn dial_instance(cmd: Command) -> InstanceId {
        match cmd {
            Command::Dial { instance, .. } => instance,
            other => panic!("expected Dial, got {:?}", other),
        }
    }

    fn timer(cmd: Command) -> (InstanceId, Duration) {
        match cmd {
            Command::ScheduleReconnect { instance, delay } => (instance, delay),
            other => panic!("expected ScheduleReconnect, got {:?}", other),
        }
    }

    #[test]
    fn connect_requires_user_and_credential() {
        let mut m = machine();
        assert_eq!(m.connect(Session::new("", "tok")), Command::Teardown);
        assert_eq!(m.connect(Session::new("B", "")), Command::Teardown);
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn missing_credential_tears_down_open_connection() {
        let mut m = machine();
        let id = dial_instance(m.connect(session()));
        m.opened(id);
        assert_eq!(m.connect(Session::new("B", "")), Command::Teardown);
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(!m.accepts(id));
    }

    #[test]
    fn connect_is_single_flight() {
        let mut m = machine();
        let id = dial_instance(m.connect(session()));
        assert_eq!(m.connect(session()), Command::None);
        m.opened(id);
        assert_eq!(m.connect(session()), Command::None);
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn new_session_replaces_connection() {
        let mut m = machine();
        let first = dial_instance(m.connect(session()));
        let second = dial_instance(m.connect(Session::new("C", "token-c")));
        assert_ne!(first, second);

        // The first socket opening late must not count.
        m.opened(first);
        assert_eq!(m.state(), ConnectionState::Connecting);
        m.opened(second);
        assert!(m.accepts(second));
        assert!(!m.accepts(first));
    }

    #[test]
    fn stale_instance_events_are_discarded() {
        let mut m = machine();
        let old = dial_instance(m.connect(session()));
        m.opened(old);
        let (t, _) = timer(m.closed(old, true));
        let new = dial_instance(m.reconnect_due(t));

        assert_eq!(m.closed(old, true), Command::None);
        assert_eq!(m.opened(old), Command::None);
        assert_eq!(m.state(), ConnectionState::Connecting);
        m.opened(new);
        assert!(m.accepts(new));
    }

    #[test]
    fn backoff_doubles_up_to_cap_then_resets() {
        let mut m = machine();
        let mut id = dial_instance(m.connect(session()));
        let mut delays = Vec::new();
        for _ in 0..7 {
            let (t, delay) = timer(m.closed(id, true));
            delays.push(delay.as_secs());
            id = dial_instance(m.reconnect_due(t));
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));

        m.opened(id);
        assert_eq!(m.status().reconnect_attempt, 0);
        let (_, delay) = timer(m.closed(id, true));
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn normal_close_does_not_reconnect() {
        let mut m = machine();
        let id = dial_instance(m.connect(session()));
        m.opened(id);
        assert_eq!(m.closed(id, false), Command::None);
        assert_eq!(m.state(), ConnectionState::Closed);
        // A fresh connect call is allowed again.
        dial_instance(m.connect(session()));
    }

    #[test]
    fn disconnect_invalidates_pending_timer() {
        let mut m = machine();
        let id = dial_instance(m.connect(session()));
        let (t, _) = timer(m.closed(id, true));
        assert_eq!(m.disconnect(), Command::Teardown);
        assert_eq!(m.reconnect_due(t), Command::None);
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn gives_up_after_cap() {
        let mut m = ConnectionMachine::new(BackoffPolicy {
            max_attempts: Some(2),
            ..Default::default()
        });
        let mut id = dial_instance(m.connect(session()));
        for _ in 0..2 {
            let (t, _) = timer(m.closed(id, true));
            id = dial_instance(m.reconnect_due(t));
        }
        assert_eq!(m.closed(id, true), Command::GiveUp { attempts: 2 });
        assert!(m.status().gave_up);
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn auth_failure_tears_down() {
        let mut m = machine();
        let id = dial_instance(m.connect(session()));
        assert_eq!(m.auth_failed(id), Command::AuthRejected);
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.reconnect_due(id), Command::None);
    }

    #[test]
    fn delay_saturates_for_large_attempts() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }
}
