//! `storefront-client`: the authenticated request pipeline.
//!
//! Composes the session from `storefront-auth` with an HTTP transport:
//! bearer/locale headers on every call, one shared refresh per burst of
//! 401s, and a single retry per request.

pub mod api;
pub mod auth_api;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod transport;

pub use api::ApiClient;
pub use auth_api::HttpAuthApi;
pub use coordinator::{RefreshCoordinator, RefreshFailed};
pub use error::PipelineError;
pub use http::{ApiRequest, ApiResponse, HttpError, HttpSend};
pub use interceptor::AuthInterceptor;
pub use transport::HttpTransport;
