/// Pulse messaging client.
///
/// `MessagingSession` ties the push gateway, the message and vote stores and
/// a `Backend` together behind one handle the UI holds for the lifetime of a
/// login.

pub mod config;
pub mod error;
pub mod session;

pub use config::Config;
pub use error::SyncError;
pub use session::MessagingSession;
