//! Transport-neutral request/response model and the `next` seam of the
//! request pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use storefront_core::ApiEnvelope;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL (`/orders?page=2`) or an absolute URL.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Path without the query string.
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }

    /// Token carried in the `Authorization: Bearer` header, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    /// Replace the bearer token. Tokens that are not valid header values are
    /// dropped (and the header removed) rather than sent mangled.
    pub fn set_bearer(&mut self, token: &str) {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                tracing::warn!("access token is not a valid header value; sending request without it");
                self.headers.remove(AUTHORIZATION);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// JSON response; serialization of a `Value` cannot fail.
    pub fn json_body(status: StatusCode, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn envelope<T: DeserializeOwned>(&self) -> Result<ApiEnvelope<T>, serde_json::Error> {
        self.json()
    }

    /// Body as text, shortened for log lines and error messages.
    pub fn body_excerpt(&self) -> String {
        const MAX: usize = 200;
        let text = String::from_utf8_lossy(&self.body);
        if text.chars().count() <= MAX {
            return text.into_owned();
        }
        let mut excerpt: String = text.chars().take(MAX).collect();
        excerpt.push('…');
        excerpt
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    Request(String),
}

/// Sends one request, no interception.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_round_trips_through_headers() {
        let mut request = ApiRequest::get("/orders");
        assert_eq!(request.bearer_token(), None);

        request.set_bearer("A1");
        assert_eq!(request.bearer_token(), Some("A1"));

        request.set_bearer("A2");
        assert_eq!(request.bearer_token(), Some("A2"));
    }

    #[test]
    fn invalid_token_is_not_sent() {
        let mut request = ApiRequest::get("/orders");
        request.set_bearer("A1");
        request.set_bearer("bad\ntoken");
        assert_eq!(request.bearer_token(), None);
    }

    #[test]
    fn route_strips_query() {
        assert_eq!(ApiRequest::get("/auth/login?next=%2F").route(), "/auth/login");
        assert_eq!(ApiRequest::get("/orders").route(), "/orders");
    }

    #[test]
    fn envelope_decodes_from_body() {
        let response = ApiResponse::json_body(
            StatusCode::OK,
            &serde_json::json!({ "success": true, "data": { "balance": 12.5 } }),
        );
        let envelope: ApiEnvelope<Value> = response.envelope().unwrap();
        assert_eq!(envelope.into_result().unwrap()["balance"], 12.5);
    }

    #[test]
    fn long_bodies_are_shortened() {
        let response = ApiResponse::new(StatusCode::BAD_GATEWAY, "x".repeat(500));
        assert_eq!(response.body_excerpt().chars().count(), 201);
    }
}
