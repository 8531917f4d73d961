use std::time::Duration;

use thiserror::Error;

use crate::frame::FrameError;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("broker did not answer within {0:?}")]
    ConnectTimeout(Duration),

    /// The broker sent an `ERROR` frame.
    #[error("broker refused: {0}")]
    Refused(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("broker unavailable")]
    Unavailable,

    #[error("connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RealtimeError::WebSocket(e.to_string())
    }
}
