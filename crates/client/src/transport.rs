//! `reqwest` implementation of [`HttpSend`].

use async_trait::async_trait;

use storefront_core::ClientConfig;

use crate::http::{ApiRequest, ApiResponse, HttpError, HttpSend};

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HttpError::Request(e.to_string()))?;

        Ok(Self::with_client(client, &config.api_base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl HttpSend for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        let ApiRequest {
            method,
            path,
            headers,
            body,
        } = request;
        let url = self.url(&path);

        let mut builder = self.client.request(method.clone(), &url).headers(headers);
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::debug!(%method, %url, error = %e, "http request failed");
            HttpError::Network(e.to_string())
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpError::Network(e.to_string()))?;

        tracing::debug!(%method, %url, status = status.as_u16(), "http exchange");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
