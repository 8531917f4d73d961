//! The `{ success, data, message, errorCode }` envelope every backend call returns.

use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult, UserProfile};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error_code: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            error_code: None,
        }
    }

    /// Unwrap `data`, treating `success = false` as a rejection.
    pub fn into_result(self) -> CoreResult<T> {
        self.check()?;
        self.data.ok_or(CoreError::MissingData)
    }

    /// Like [`ApiEnvelope::into_result`] for calls whose `data` is irrelevant.
    pub fn into_unit(self) -> CoreResult<()> {
        self.check()
    }

    fn check(&self) -> CoreResult<()> {
        if self.success {
            return Ok(());
        }
        Err(CoreError::Rejected {
            message: self
                .message
                .clone()
                .unwrap_or_else(|| "request was not successful".to_string()),
            error_code: self.error_code.clone(),
        })
    }
}

/// `data` payload of the login, registration and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            user: None,
        }
    }

    pub fn with_user(mut self, user: UserProfile) -> Self {
        self.user = Some(user);
        self
    }
}
