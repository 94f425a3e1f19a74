use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, trace, warn};

use pulse_types::{PushEvent, Session};

use crate::machine::{BackoffPolicy, Command, ConnectionMachine, ConnectionStatus, InstanceId};
use crate::router::EventRouter;

/// Default spacing between client Pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Ping rounds that may pass without a Pong before the socket counts as dead.
const MISSED_PONG_LIMIT: u8 = 2;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `ws://` or `wss://` endpoint of the push channel.
    pub url: String,
    pub backoff: BackoffPolicy,
    pub heartbeat_interval: Duration,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: BackoffPolicy::default(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// What the gateway hands to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewaySignal {
    /// A classified push frame from the live connection
    Push(PushEvent),

    /// The backend refused the credential; the session is over
    AuthRejected,

    /// Reconnection stopped after the configured number of attempts
    GaveUp { attempts: u32 },
}

/// Transport callbacks from a socket task.
#[derive(Debug)]
enum SocketEvent {
    Opened,
    Frame(String),
    Closed { abnormal: bool },
    Rejected,
}

enum Input {
    Connect(Session),
    Disconnect,
    Shutdown,
    Socket { instance: InstanceId, event: SocketEvent },
    ReconnectDue(InstanceId),
}

/// Handle to the connection supervisor task.
///
/// Cloning is cheap; all clones drive the same single logical connection.
#[derive(Clone)]
pub struct Gateway {
    input_tx: mpsc::UnboundedSender<Input>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl Gateway {
    /// Spawn the supervisor. Classified events and session-level notices
    /// arrive on the returned receiver in transport order.
    pub fn spawn(config: GatewayConfig) -> (Self, mpsc::UnboundedReceiver<GatewaySignal>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            machine: ConnectionMachine::new(config.backoff.clone()),
            router: EventRouter::new(),
            config,
            input_tx: input_tx.clone(),
            status_tx,
            signal_tx,
            socket: None,
            timer: None,
        };
        tokio::spawn(supervisor.run(input_rx));

        (Self { input_tx, status_rx }, signal_rx)
    }

    pub fn connect(&self, session: Session) {
        let _ = self.input_tx.send(Input::Connect(session));
    }

    pub fn disconnect(&self) {
        let _ = self.input_tx.send(Input::Disconnect);
    }

    /// Close the connection and stop the supervisor.
    pub fn shutdown(&self) {
        let _ = self.input_tx.send(Input::Shutdown);
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }
}

struct SocketHandle {
    instance: InstanceId,
    close_tx: oneshot::Sender<()>,
    _task: JoinHandle<()>,
}

/// Sole owner of the state machine. Every callback funnels through one
/// channel, so transitions are applied one at a time in delivery order.
struct Supervisor {
    machine: ConnectionMachine,
    router: EventRouter,
    config: GatewayConfig,
    input_tx: mpsc::UnboundedSender<Input>,
    status_tx: watch::Sender<ConnectionStatus>,
    signal_tx: mpsc::UnboundedSender<GatewaySignal>,
    socket: Option<SocketHandle>,
    timer: Option<JoinHandle<()>>,
}

impl Supervisor {
    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = input_rx.recv().await {
            let command = match input {
                Input::Connect(session) => self.machine.connect(session),
                Input::Disconnect => self.machine.disconnect(),
                Input::Shutdown => {
                    self.machine.disconnect();
                    self.teardown();
                    self.publish_status();
                    break;
                }
                Input::ReconnectDue(timer) => self.machine.reconnect_due(timer),
                Input::Socket { instance, event } => self.on_socket(instance, event),
            };
            self.perform(command);
            self.publish_status();
        }
        debug!("Gateway supervisor stopped");
    }

    fn on_socket(&mut self, instance: InstanceId, event: SocketEvent) -> Command {
        match event {
            SocketEvent::Opened => self.machine.opened(instance),
            SocketEvent::Frame(text) => {
                if !self.machine.accepts(instance) {
                    trace!("Discarding frame from stale instance {}", instance);
                    return Command::None;
                }
                if let Ok(event) = self.router.route(&text) {
                    let _ = self.signal_tx.send(GatewaySignal::Push(event));
                }
                Command::None
            }
            SocketEvent::Closed { abnormal } => self.machine.closed(instance, abnormal),
            SocketEvent::Rejected => self.machine.auth_failed(instance),
        }
    }

    fn perform(&mut self, command: Command) {
        match command {
            Command::None => {}
            Command::Dial { instance, session } => {
                self.teardown();
                let (close_tx, close_rx) = oneshot::channel();
                let task = tokio::spawn(run_socket(
                    instance,
                    self.config.url.clone(),
                    session.token,
                    self.config.heartbeat_interval,
                    self.input_tx.clone(),
                    close_rx,
                ));
                self.socket = Some(SocketHandle {
                    instance,
                    close_tx,
                    _task: task,
                });
            }
            Command::ScheduleReconnect { instance, delay } => {
                if let Some(old) = self.timer.take() {
                    old.abort();
                }
                let tx = self.input_tx.clone();
                self.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Input::ReconnectDue(instance));
                }));
            }
            Command::Teardown => self.teardown(),
            Command::AuthRejected => {
                self.teardown();
                let _ = self.signal_tx.send(GatewaySignal::AuthRejected);
            }
            Command::GiveUp { attempts } => {
                let _ = self.signal_tx.send(GatewaySignal::GaveUp { attempts });
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!("Closing gateway socket (instance {})", socket.instance);
            let _ = socket.close_tx.send(());
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn publish_status(&self) {
        let status = self.machine.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

fn build_request(url: &str, token: &str) -> Result<Request, tungstenite::Error> {
    let mut request = url.into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
    request.headers_mut().insert(header::AUTHORIZATION, bearer);
    Ok(request)
}

/// Tracks Pongs between the client's Ping rounds.
#[derive(Debug)]
struct Liveness {
    answered: bool,
    silent_rounds: u8,
}

impl Liveness {
    fn new() -> Self {
        Self {
            answered: true,
            silent_rounds: 0,
        }
    }

    fn pong(&mut self) {
        self.answered = true;
    }

    /// Called before each Ping. Returns false once the server has stayed
    /// silent for `MISSED_PONG_LIMIT` rounds in a row.
    fn next_round(&mut self) -> bool {
        if std::mem::replace(&mut self.answered, false) {
            self.silent_rounds = 0;
            return true;
        }
        self.silent_rounds += 1;
        self.silent_rounds < MISSED_PONG_LIMIT
    }
}

/// One socket's lifetime. Reports open/frame/close back to the supervisor,
/// tagged with `instance`, and exits quietly when asked to close.
async fn run_socket(
    instance: InstanceId,
    url: String,
    token: String,
    heartbeat_interval: Duration,
    tx: mpsc::UnboundedSender<Input>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let report = |event: SocketEvent| {
        let _ = tx.send(Input::Socket { instance, event });
    };

    let request = match build_request(&url, &token) {
        Ok(request) => request,
        Err(e) => {
            warn!("Invalid gateway request for {}: {}", url, e);
            report(SocketEvent::Closed { abnormal: true });
            return;
        }
    };

    let connected = tokio::select! {
        result = tokio_tungstenite::connect_async(request) => result,
        _ = &mut close_rx => return,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(tungstenite::Error::Http(resp)) if matches!(resp.status().as_u16(), 401 | 403) => {
            warn!("Gateway upgrade refused with {}", resp.status());
            report(SocketEvent::Rejected);
            return;
        }
        Err(e) => {
            warn!("Gateway connect failed: {}", e);
            report(SocketEvent::Closed { abnormal: true });
            return;
        }
    };

    report(SocketEvent::Opened);
    let (mut sender, mut receiver) = ws_stream.split();

    let mut ping_timer = tokio::time::interval(heartbeat_interval);
    ping_timer.tick().await;
    let mut liveness = Liveness::new();

    let abnormal = loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => report(SocketEvent::Frame(text.to_string())),
                Some(Ok(Message::Pong(_))) => liveness.pong(),
                Some(Ok(Message::Close(frame))) => {
                    let normal = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                    info!("Gateway sent close (instance {}, normal={})", instance, normal);
                    break !normal;
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Gateway read error: {}", e);
                    break true;
                }
                None => break true,
            },
            _ = ping_timer.tick() => {
                if !liveness.next_round() {
                    warn!("No pong from gateway in {} rounds (instance {}), reconnecting", MISSED_PONG_LIMIT, instance);
                    break true;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break true;
                }
            }
            _ = &mut close_rx => {
                let _ = sender.send(Message::Close(None)).await;
                debug!("Gateway socket closed locally (instance {})", instance);
                return;
            }
        }
    };

    report(SocketEvent::Closed { abnormal });
}
