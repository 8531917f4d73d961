//! Observable session state.
//!
//! `SessionState` is the only writer of the [`CredentialStore`]. It exposes
//! the authentication status as a `watch` channel so collaborators (wallet
//! balance, header avatar, route guards) react to login/logout without
//! polling.
//!
//! Lifecycle per application load:
//!
//! ```text
//! Uninitialized ──restore_from_storage()──▶ Restoring ──▶ Ready(authenticated | unauthenticated)
//! ```
//!
//! Every path out of `Restoring` ends in `Ready`; the ready signal fires
//! exactly once per load.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use storefront_core::{AuthTokens, ClientConfig, CredentialRecord, RuntimeCapabilities, UserProfile};

use crate::api::{AuthApi, AuthError, LoginRequest, RegisterRequest};
use crate::credential_store::CredentialStore;
use crate::navigator::{Navigator, NoopNavigator};
use crate::storage::{KeyValueStore, MemoryStorage, StorageError, keys};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Restoring,
    Ready,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub authenticated: bool,
}

impl SessionStatus {
    pub fn is_ready(&self) -> bool {
        self.phase == SessionPhase::Ready
    }
}

pub struct SessionState {
    store: CredentialStore,
    api: Arc<dyn AuthApi>,
    navigator: Arc<dyn Navigator>,
    status: watch::Sender<SessionStatus>,
    capabilities: RuntimeCapabilities,
    restore_started: AtomicBool,
    refresh_timeout: Duration,
    default_locale: String,
    login_route: String,
}

impl SessionState {
    /// Build the session.
    ///
    /// Without persistent storage (server-side render) the given store is
    /// ignored and credentials live in memory for the lifetime of the pass.
    pub fn new(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn KeyValueStore>,
        capabilities: RuntimeCapabilities,
        config: &ClientConfig,
    ) -> Self {
        let storage: Arc<dyn KeyValueStore> = if capabilities.has_persistent_storage {
            storage
        } else {
            Arc::new(MemoryStorage::new())
        };
        let (status, _) = watch::channel(SessionStatus::default());

        Self {
            store: CredentialStore::new(storage),
            api,
            navigator: Arc::new(NoopNavigator),
            status,
            capabilities,
            restore_started: AtomicBool::new(false),
            refresh_timeout: config.refresh_timeout,
            default_locale: config.default_locale.clone(),
            login_route: config.login_route.clone(),
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read side
    // ─────────────────────────────────────────────────────────────────────────

    pub fn credentials(&self) -> &CredentialStore {
        &self.store
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.store.snapshot().has_refresh_token()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.store.profile()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.snapshot().is_authenticated()
    }

    pub fn is_admin(&self) -> bool {
        self.is_authenticated() && self.profile().is_some_and(|p| p.is_admin())
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Persisted language preference, or the configured default.
    ///
    /// Synchronous storage read only; never waits on the network.
    pub fn locale(&self) -> String {
        self.store
            .storage()
            .get(keys::LANGUAGE)
            .filter(|lang| !lang.trim().is_empty())
            .unwrap_or_else(|| self.default_locale.clone())
    }

    pub fn set_locale(&self, locale: &str) -> Result<(), StorageError> {
        self.store.storage().set(keys::LANGUAGE, locale)
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn login(&self, request: &LoginRequest) -> Result<Option<UserProfile>, AuthError> {
        let tokens = self.api.login(request).await.inspect_err(|e| {
            tracing::info!(username = %request.username, error = %e, "login failed");
        })?;
        Ok(self.establish(tokens).await)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<Option<UserProfile>, AuthError> {
        let tokens = self.api.register(request).await.inspect_err(|e| {
            tracing::info!(username = %request.username, error = %e, "registration failed");
        })?;
        Ok(self.establish(tokens).await)
    }

    /// Install freshly issued tokens (login, registration or OAuth callback).
    ///
    /// When the issuer did not include the user, the profile is fetched with
    /// the new access token; a failed fetch keeps the tokens and leaves the
    /// profile empty.
    pub async fn establish(&self, tokens: AuthTokens) -> Option<UserProfile> {
        let AuthTokens {
            access_token,
            refresh_token,
            user,
        } = tokens;

        let profile = match user {
            Some(user) => Some(user),
            None => match self.api.fetch_profile(&access_token).await {
                Ok(profile) => Some(profile),
                Err(e) => {
                    tracing::warn!(error = %e, "profile fetch after sign-in failed");
                    None
                }
            },
        };

        self.store.replace(CredentialRecord {
            access_token: Some(access_token),
            refresh_token,
            profile: profile.clone(),
        });
        self.status.send_modify(|status| status.authenticated = true);

        tracing::info!(
            user = profile.as_ref().map(|p| p.username.as_str()),
            "session established"
        );
        profile
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Fails fast (no network call) when no refresh token is stored. Any
    /// failure clears all credentials. The stored refresh token is never
    /// replaced by this call.
    pub async fn refresh_token(&self) -> Result<String, AuthError> {
        let Some(refresh_token) = self.store.refresh_token() else {
            tracing::debug!("refresh requested without a refresh token");
            self.clear_credentials();
            return Err(AuthError::NoRefreshToken);
        };

        tracing::debug!("exchanging refresh token");
        let outcome = tokio::time::timeout(self.refresh_timeout, self.api.refresh(&refresh_token))
            .await
            .unwrap_or(Err(AuthError::Timeout));

        match outcome {
            Ok(tokens) => {
                let access_token = tokens.access_token;
                self.store
                    .update(|current| current.with_access_token(access_token.clone()));
                self.set_authenticated(true);
                tracing::info!("access token refreshed");
                Ok(access_token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "refresh token exchange failed; clearing credentials");
                self.clear_credentials();
                Err(e)
            }
        }
    }

    pub fn update_profile(&self, profile: UserProfile) {
        self.store.update(|current| CredentialRecord {
            profile: Some(profile.clone()),
            ..current.clone()
        });
        self.status.send_modify(|_| {});
    }

    /// Clear credentials and send the user to the login screen.
    ///
    /// Idempotent: once the router shows the login screen further calls only
    /// re-clear the (already empty) store.
    pub fn logout(&self) {
        let had_credentials = !self.store.snapshot().is_empty();
        self.clear_credentials();

        if had_credentials {
            tracing::info!("logged out");
        }

        let current = self.navigator.current_route();
        if current.as_deref().is_some_and(|route| self.is_login_route(route)) {
            return;
        }
        self.navigator.redirect_to_login(current.as_deref());
    }

    /// Resolve the initial session from durable storage.
    ///
    /// - access token present: trusted as-is, no validation round trip
    /// - only a refresh token: exactly one silent refresh attempt
    /// - nothing: ready, unauthenticated
    ///
    /// A corrupted stored profile is dropped; the tokens are kept.
    /// Concurrent or repeated calls wait for the first one.
    pub async fn restore_from_storage(&self) -> bool {
        if self.restore_started.swap(true, Ordering::SeqCst) {
            return self.wait_for_auth_ready().await;
        }
        self.status
            .send_modify(|status| status.phase = SessionPhase::Restoring);

        if !self.capabilities.has_persistent_storage {
            self.mark_ready(false);
            return false;
        }

        let restored = self.store.load();
        if restored.profile_corrupted {
            tracing::warn!("continuing session restore without a cached profile");
        }

        let authenticated = if restored.record.is_authenticated() {
            true
        } else if restored.record.has_refresh_token() {
            self.refresh_token().await.is_ok()
        } else {
            false
        };

        self.mark_ready(authenticated);
        tracing::info!(authenticated, "session restored");
        authenticated
    }

    /// Resolves once the initial restore finished; yields the authentication
    /// state at that moment.
    pub async fn wait_for_auth_ready(&self) -> bool {
        let mut rx = self.status.subscribe();
        let ready = rx
            .wait_for(SessionStatus::is_ready)
            .await
            .map(|status| status.authenticated);
        ready.unwrap_or(false)
    }

    fn clear_credentials(&self) {
        self.store.clear();
        self.set_authenticated(false);
    }

    fn set_authenticated(&self, authenticated: bool) {
        self.status.send_if_modified(|status| {
            let changed = status.authenticated != authenticated;
            status.authenticated = authenticated;
            changed
        });
    }

    fn mark_ready(&self, authenticated: bool) {
        self.status.send_modify(|status| {
            status.phase = SessionPhase::Ready;
            status.authenticated = authenticated;
        });
    }

    fn is_login_route(&self, route: &str) -> bool {
        route == self.login_route
            || route
                .strip_prefix(self.login_route.as_str())
                .is_some_and(|rest| rest.starts_with('?'))
    }
}
