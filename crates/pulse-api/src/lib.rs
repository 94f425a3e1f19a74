/// Pulse REST client.
///
/// `Backend` is the seam the session layer talks through; `HttpBackend` is the
/// reqwest implementation against the real service.

pub mod auth;
pub mod backend;
pub mod error;
pub mod messages;
pub mod votes;

pub use auth::{read_claims, session_from_token};
pub use backend::{Backend, HttpBackend};
pub use error::ApiError;
