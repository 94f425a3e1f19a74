use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// 401 or 403. The external auth layer treats this as the end of the session.
    #[error("not authorized ({0})")]
    Unauthorized(u16),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Map a non-success status and its body to an error.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(status.as_u16()),
            StatusCode::CONFLICT => Self::Conflict(body),
            _ => Self::Status {
                status: status.as_u16(),
                body,
            },
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
