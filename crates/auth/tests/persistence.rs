use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use storefront_auth::{
    Access, AuthApi, AuthError, FileStorage, GuardDecision, KeyValueStore, LoginRequest,
    RegisterRequest, RouteGuard, SessionState,
};
use storefront_core::{AuthTokens, ClientConfig, RuntimeCapabilities, UserProfile};

/// Backend that accepts any login and mints `A2` on refresh.
#[derive(Default)]
struct Backend {
    refresh_calls: AtomicUsize,
}

#[async_trait]
impl AuthApi for Backend {
    async fn login(&self, request: &LoginRequest) -> Result<AuthTokens, AuthError> {
        let user = UserProfile::new("7", request.username.clone()).with_role("ADMIN");
        Ok(AuthTokens::new("A1", Some("R1".into())).with_user(user))
    }

    async fn register(&self, _request: &RegisterRequest) -> Result<AuthTokens, AuthError> {
        Err(AuthError::Rejected("registration closed".into()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if refresh_token == "R1" {
            Ok(AuthTokens::new("A2", None))
        } else {
            Err(AuthError::Rejected("refresh token expired".into()))
        }
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<UserProfile, AuthError> {
        Ok(UserProfile::new("7", "restored"))
    }
}

fn session_at(path: &std::path::Path, backend: Arc<Backend>) -> (Arc<FileStorage>, SessionState) {
    let storage = Arc::new(FileStorage::open(path).unwrap());
    let session = SessionState::new(
        backend,
        storage.clone(),
        RuntimeCapabilities::ui(),
        &ClientConfig::default(),
    );
    (storage, session)
}

#[tokio::test]
async fn login_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let backend = Arc::new(Backend::default());

    let (_, first) = session_at(&path, backend.clone());
    first.login(&LoginRequest::new("alice", "pw")).await.unwrap();
    drop(first);

    let (_, second) = session_at(&path, backend.clone());
    assert!(second.restore_from_storage().await);
    assert_eq!(second.access_token().as_deref(), Some("A1"));
    assert_eq!(second.profile().unwrap().username, "alice");
    assert!(second.is_admin());
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refresh_token_alone_is_exchanged_on_restore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    {
        let storage = FileStorage::open(&path).unwrap();
        storage.set("refreshToken", "R1").unwrap();
    }
    let backend = Arc::new(Backend::default());

    let (storage, session) = session_at(&path, backend.clone());

    assert!(session.restore_from_storage().await);
    assert_eq!(session.access_token().as_deref(), Some("A2"));
    assert_eq!(storage.get("accessToken").as_deref(), Some("A2"));
    assert_eq!(storage.get("refreshToken").as_deref(), Some("R1"));
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_wipes_the_persisted_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let backend = Arc::new(Backend::default());

    let (_, first) = session_at(&path, backend.clone());
    first.login(&LoginRequest::new("alice", "pw")).await.unwrap();
    first.set_locale("de").unwrap();
    first.logout();
    drop(first);

    let (storage, second) = session_at(&path, backend);
    assert!(!second.restore_from_storage().await);
    assert_eq!(storage.get("accessToken"), None);
    assert_eq!(storage.get("refreshToken"), None);
    assert_eq!(storage.get("currentUser"), None);
    // Language is a preference, not a credential.
    assert_eq!(second.locale(), "de");
}

#[tokio::test]
async fn guard_waits_for_restore_before_deciding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let backend = Arc::new(Backend::default());
    {
        let (_, session) = session_at(&path, backend.clone());
        session.login(&LoginRequest::new("alice", "pw")).await.unwrap();
    }

    let (_, session) = session_at(&path, backend);
    let session = Arc::new(session);
    let guard = RouteGuard::new(session.clone());

    let decision = tokio::spawn({
        let guard = guard.clone();
        async move { guard.check("/admin/orders", Access::Admin).await }
    });
    tokio::task::yield_now().await;
    assert!(session.restore_from_storage().await);

    assert_eq!(decision.await.unwrap(), GuardDecision::Allow);
}
