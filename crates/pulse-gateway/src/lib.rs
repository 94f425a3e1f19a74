/// Pulse gateway: the client side of the push channel.
///
/// - `machine`: connection lifecycle state machine with exponential backoff
/// - `router`: classifies raw frames into push events
/// - `connection`: tokio-tungstenite driver that runs the machine

pub mod connection;
pub mod machine;
pub mod router;

pub use connection::{Gateway, GatewayConfig, GatewaySignal, HEARTBEAT_INTERVAL};
pub use machine::{BackoffPolicy, Command, ConnectionMachine, ConnectionState, ConnectionStatus, InstanceId};
pub use router::{EventRouter, RouteError, route};
