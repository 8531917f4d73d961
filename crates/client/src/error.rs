use reqwest::StatusCode;
use thiserror::Error;

use storefront_core::CoreError;

use crate::http::HttpError;

/// Failure of a call made through the authenticated pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 401 with no refresh token stored. The session was logged out.
    #[error("not signed in")]
    Unauthenticated,

    /// The refresh exchange failed. The session was logged out; every caller
    /// queued behind the refresh receives this.
    #[error("session expired")]
    SessionExpired,

    /// 401 on the single retry after a refresh.
    #[error("request rejected again after token refresh")]
    RetryRejected,

    #[error(transparent)]
    Transport(#[from] HttpError),

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The backend answered `success = false`.
    #[error(transparent)]
    Rejected(#[from] CoreError),

    /// Non-success status without a readable envelope.
    #[error("unexpected status {status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl PipelineError {
    /// True for the variants after which the user is signed out.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::SessionExpired)
    }
}
