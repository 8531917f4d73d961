//! Application-facing API client.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use storefront_auth::{KeyValueStore, Navigator, SessionState};
use storefront_core::{ClientConfig, RuntimeCapabilities};

use crate::auth_api::HttpAuthApi;
use crate::coordinator::RefreshCoordinator;
use crate::error::PipelineError;
use crate::http::{ApiRequest, ApiResponse, HttpError, HttpSend};
use crate::interceptor::AuthInterceptor;
use crate::transport::HttpTransport;

/// Interceptor plus transport: the composed `(request, next)` pipeline.
#[derive(Clone)]
pub struct ApiClient {
    interceptor: Arc<AuthInterceptor>,
    transport: Arc<dyn HttpSend>,
}

impl ApiClient {
    pub fn new(interceptor: Arc<AuthInterceptor>, transport: Arc<dyn HttpSend>) -> Self {
        Self {
            interceptor,
            transport,
        }
    }

    /// Wire a session, refresh coordinator and pipeline over one transport.
    pub fn with_transport(
        config: &ClientConfig,
        transport: Arc<dyn HttpSend>,
        storage: Arc<dyn KeyValueStore>,
        capabilities: RuntimeCapabilities,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let auth_api = Arc::new(HttpAuthApi::new(transport.clone(), config));
        let session = Arc::new(
            SessionState::new(auth_api, storage, capabilities, config).with_navigator(navigator),
        );
        let interceptor = Arc::new(AuthInterceptor::new(
            session,
            Arc::new(RefreshCoordinator::new()),
            config,
        ));
        Self::new(interceptor, transport)
    }

    /// Same as [`ApiClient::with_transport`] over a `reqwest` transport.
    pub fn from_config(
        config: &ClientConfig,
        storage: Arc<dyn KeyValueStore>,
        capabilities: RuntimeCapabilities,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, HttpError> {
        let transport = Arc::new(HttpTransport::new(config)?);
        Ok(Self::with_transport(
            config,
            transport,
            storage,
            capabilities,
            navigator,
        ))
    }

    pub fn session(&self) -> &Arc<SessionState> {
        self.interceptor.session()
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, PipelineError> {
        self.interceptor
            .intercept(request, self.transport.as_ref())
            .await
    }

    /// Send and unwrap the `{ success, data }` envelope.
    pub async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, PipelineError> {
        let response = self.send(request).await?;
        match response.envelope::<T>() {
            Ok(envelope) => Ok(envelope.into_result()?),
            Err(e) if response.status.is_success() => Err(e.into()),
            Err(_) => Err(PipelineError::Status {
                status: response.status,
                message: response.body_excerpt(),
            }),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PipelineError> {
        self.call(ApiRequest::get(path)).await
    }

    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, PipelineError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.call(ApiRequest::post(path).with_json(body)).await
    }
}
