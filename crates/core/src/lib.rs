//! `storefront-core`: shared session and realtime data model.
//!
//! This crate contains **plain data** (no network, no storage): credential
//! records, user profiles, the API envelope, runtime capabilities and client
//! configuration.

pub mod capabilities;
pub mod config;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod id;
pub mod profile;

pub use capabilities::RuntimeCapabilities;
pub use config::ClientConfig;
pub use credentials::CredentialRecord;
pub use envelope::{ApiEnvelope, AuthTokens};
pub use error::{CoreError, CoreResult};
pub use id::UserId;
pub use profile::UserProfile;
