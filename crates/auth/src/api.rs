//! Boundary to the backend authentication endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_core::{AuthTokens, UserProfile};

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No refresh token is stored; nothing to exchange.
    #[error("no refresh token stored")]
    NoRefreshToken,

    /// The backend answered `success = false` (or an equivalent status).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("refresh exchange timed out")]
    Timeout,
}

/// Authentication endpoints.
///
/// Implementations must talk to the backend directly, never through the
/// authenticated request pipeline (a 401 from the refresh endpoint must not
/// trigger another refresh).
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<AuthTokens, AuthError>;

    async fn register(&self, request: &RegisterRequest) -> Result<AuthTokens, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, AuthError>;
}
