//! [`AuthApi`] over plain HTTP.
//!
//! Talks to the raw transport, never to the intercepted pipeline: a 401 from
//! `/auth/refresh` must not start another refresh.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

use storefront_auth::{AuthApi, AuthError, LoginRequest, RegisterRequest};
use storefront_core::{AuthTokens, ClientConfig, CoreError, UserProfile};

use crate::http::{ApiRequest, HttpSend};

pub struct HttpAuthApi {
    http: Arc<dyn HttpSend>,
    login_path: String,
    register_path: String,
    refresh_path: String,
    profile_path: String,
}

impl HttpAuthApi {
    pub fn new(http: Arc<dyn HttpSend>, config: &ClientConfig) -> Self {
        Self {
            http,
            login_path: config.login_path.clone(),
            register_path: config.register_path.clone(),
            refresh_path: config.refresh_path.clone(),
            profile_path: config.profile_path.clone(),
        }
    }

    async fn exchange<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, AuthError> {
        let response = self
            .http
            .send(request)
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        match response.envelope::<T>() {
            Ok(envelope) => envelope.into_result().map_err(|e| match e {
                CoreError::Rejected { message, .. } => AuthError::Rejected(message),
                other => AuthError::Decode(other.to_string()),
            }),
            Err(_) if !response.status.is_success() => Err(AuthError::Rejected(format!(
                "{}: {}",
                response.status,
                response.body_excerpt()
            ))),
            Err(e) => Err(AuthError::Decode(e.to_string())),
        }
    }

    fn post<B: serde::Serialize>(path: &str, body: &B) -> Result<ApiRequest, AuthError> {
        let body = serde_json::to_value(body).map_err(|e| AuthError::Decode(e.to_string()))?;
        Ok(ApiRequest::post(path).with_json(body))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, request: &LoginRequest) -> Result<AuthTokens, AuthError> {
        self.exchange(Self::post(&self.login_path, request)?).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthTokens, AuthError> {
        self.exchange(Self::post(&self.register_path, request)?).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let request =
            ApiRequest::post(&self.refresh_path).with_json(json!({ "refreshToken": refresh_token }));
        self.exchange(request).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let mut request = ApiRequest::get(&self.profile_path);
        request.set_bearer(access_token);
        self.exchange(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use reqwest::StatusCode;
    use serde_json::Value;

    use super::*;
    use crate::http::{ApiResponse, HttpError};

    struct Canned {
        response: ApiResponse,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Canned {
        fn new(status: StatusCode, body: Value) -> Arc<Self> {
            Arc::new(Self {
                response: ApiResponse::json_body(status, &body),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpSend for Canned {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn api(http: Arc<Canned>) -> HttpAuthApi {
        HttpAuthApi::new(http, &ClientConfig::default())
    }

    #[tokio::test]
    async fn refresh_posts_the_refresh_token() {
        let http = Canned::new(
            StatusCode::OK,
            json!({ "success": true, "data": { "accessToken": "A2" } }),
        );

        let tokens = api(http.clone()).refresh("R1").await.unwrap();

        assert_eq!(tokens.access_token, "A2");
        let seen = http.seen.lock().unwrap();
        assert_eq!(seen[0].path, "/auth/refresh");
        assert_eq!(seen[0].body.as_ref().unwrap()["refreshToken"], "R1");
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_a_rejection() {
        let http = Canned::new(
            StatusCode::OK,
            json!({ "success": false, "message": "Invalid credentials" }),
        );

        let err = api(http).login(&LoginRequest::new("alice", "nope")).await.unwrap_err();

        assert_eq!(err, AuthError::Rejected("Invalid credentials".into()));
    }

    #[tokio::test]
    async fn error_status_without_envelope_is_a_rejection() {
        let http = Arc::new(Canned {
            response: ApiResponse::new(StatusCode::UNAUTHORIZED, "Unauthorized"),
            seen: Mutex::new(Vec::new()),
        });

        let err = api(http).refresh("R1").await.unwrap_err();

        assert!(matches!(err, AuthError::Rejected(_)));
    }

    #[tokio::test]
    async fn profile_fetch_sends_the_new_token() {
        let http = Canned::new(
            StatusCode::OK,
            json!({ "success": true, "data": { "id": 3, "username": "carol" } }),
        );

        let profile = api(http.clone()).fetch_profile("A1").await.unwrap();

        assert_eq!(profile.username, "carol");
        assert_eq!(http.seen.lock().unwrap()[0].bearer_token(), Some("A1"));
    }
}
