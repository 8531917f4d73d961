//! `storefront-auth`: client-side session state.
//!
//! This crate owns the credential record: it persists tokens to a durable
//! key/value store, exposes the observable authentication status and performs
//! login, logout and the refresh-token exchange. It is decoupled from HTTP:
//! the backend is reached through the [`AuthApi`] seam.

pub mod api;
pub mod credential_store;
pub mod guard;
pub mod navigator;
pub mod session;
pub mod storage;

pub use api::{AuthApi, AuthError, LoginRequest, RegisterRequest};
pub use credential_store::CredentialStore;
pub use guard::{Access, GuardDecision, RouteGuard};
pub use navigator::{Navigator, NoopNavigator};
pub use session::{SessionPhase, SessionState, SessionStatus};
pub use storage::{FileStorage, KeyValueStore, MemoryStorage, StorageError};
