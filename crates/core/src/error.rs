//! Core error model.

use thiserror::Error;

/// Result type used across the data-model layer.
pub type CoreResult<T> = Result<T, CoreError>;

/// Data-model level error.
///
/// Keep this focused on deterministic failures while interpreting server
/// payloads or configuration. Transport concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The server answered with `success = false`.
    #[error("request rejected: {message}")]
    Rejected {
        message: String,
        error_code: Option<String>,
    },

    /// The envelope reported success but carried no `data`.
    #[error("response carried no data")]
    MissingData,

    /// A configuration value could not be interpreted.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            error_code: None,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Server-provided error code, when the failure came from an envelope.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Rejected { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }
}
