use pulse_api::ApiError;
use pulse_types::VoteTarget;

/// Failures a UI shows to the user. Transport and frame errors never get
/// this far; the gateway recovers from those on its own.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("session has ended")]
    SessionEnded,

    #[error("nothing to vote on: {0} has no id")]
    UnknownTarget(VoteTarget),

    #[error("could not load messages: {0}")]
    FetchFailed(#[source] ApiError),

    #[error("send failed: {0}")]
    SendFailed(#[source] ApiError),

    #[error("vote failed: {0}")]
    VoteFailed(#[source] ApiError),

    #[error("vote on {0} conflicts with one the server already has")]
    VoteConflict(VoteTarget),

    #[error("could not mark messages read: {0}")]
    MarkReadFailed(#[source] ApiError),
}
