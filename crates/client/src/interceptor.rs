//! The authenticated request pipeline.
//!
//! Every outgoing call goes through [`AuthInterceptor::intercept`]:
//!
//! 1. attach `Authorization: Bearer`, `Accept-Language` and `X-Request-Id`
//! 2. send
//! 3. non-401 responses (and 401 from the login endpoint) pass through
//! 4. on 401: logout when no refresh token is stored, otherwise obtain a new
//!    token through the shared [`RefreshCoordinator`] (reusing one another
//!    request already rotated in) and retry once
//! 5. a 401 on the retry is terminal

use std::sync::Arc;

use reqwest::header::{ACCEPT_LANGUAGE, HeaderName, HeaderValue};
use uuid::Uuid;

use storefront_auth::SessionState;
use storefront_core::ClientConfig;

use crate::coordinator::RefreshCoordinator;
use crate::error::PipelineError;
use crate::http::{ApiRequest, ApiResponse, HttpSend};

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub struct AuthInterceptor {
    session: Arc<SessionState>,
    coordinator: Arc<RefreshCoordinator>,
    login_path: String,
}

impl AuthInterceptor {
    pub fn new(
        session: Arc<SessionState>,
        coordinator: Arc<RefreshCoordinator>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            session,
            coordinator,
            login_path: config.login_path.clone(),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub async fn intercept(
        &self,
        mut request: ApiRequest,
        next: &dyn HttpSend,
    ) -> Result<ApiResponse, PipelineError> {
        let request_id = Uuid::now_v7();
        self.decorate(&mut request, request_id);

        let sent_with = self.session.access_token();
        if let Some(token) = &sent_with {
            request.set_bearer(token);
        }

        let response = next.send(request.clone()).await?;
        if !response.is_unauthorized() || self.is_login_request(&request) {
            return Ok(response);
        }

        tracing::info!(%request_id, path = %request.route(), "request rejected with 401");

        if !self.session.has_refresh_token() {
            tracing::info!(%request_id, "no refresh token stored; signing out");
            self.session.logout();
            return Err(PipelineError::Unauthenticated);
        }

        let token = self.refresh(sent_with.as_deref()).await?;

        request.set_bearer(&token);
        let retried = next.send(request).await?;
        if retried.is_unauthorized() {
            tracing::warn!(%request_id, "retried request rejected with 401");
            return Err(PipelineError::RetryRejected);
        }
        Ok(retried)
    }

    /// New token through the shared coordinator. A token that another
    /// request already rotated in is reused without a new exchange.
    ///
    /// The exchange (and the logout on failure) runs to completion even if
    /// this request is dropped while waiting.
    async fn refresh(&self, rejected: Option<&str>) -> Result<String, PipelineError> {
        let session = self.session.clone();
        self.coordinator
            .run(
                rejected,
                || self.session.access_token(),
                move || async move {
                    session
                        .refresh_token()
                        .await
                        .inspect_err(|_| session.logout())
                },
            )
            .await
            .map_err(|_| PipelineError::SessionExpired)
    }

    fn decorate(&self, request: &mut ApiRequest, request_id: Uuid) {
        let locale = self.session.locale();
        match HeaderValue::from_str(&locale) {
            Ok(value) => {
                request.headers.insert(ACCEPT_LANGUAGE, value);
            }
            Err(_) => tracing::warn!(%locale, "stored locale is not a valid header value"),
        }

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            request.headers.insert(REQUEST_ID, value);
        }
    }

    fn is_login_request(&self, request: &ApiRequest) -> bool {
        request.route().ends_with(self.login_path.as_str())
    }
}
