//! Route access checks.
//!
//! Guards must not decide before the initial session restore finished,
//! otherwise a returning user with a valid stored token is bounced to the
//! login screen on first paint.

use std::sync::Arc;

use crate::session::SessionState;

/// Access level a route requires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Not signed in; go to login and come back to `return_to` afterwards.
    RedirectToLogin { return_to: String },
    /// Signed in, but the profile lacks the required role.
    Forbidden,
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

#[derive(Clone)]
pub struct RouteGuard {
    session: Arc<SessionState>,
}

impl RouteGuard {
    pub fn new(session: Arc<SessionState>) -> Self {
        Self { session }
    }

    /// Decide whether `route` may be shown.
    ///
    /// Waits for the session to become ready before looking at credentials.
    pub async fn check(&self, route: &str, access: Access) -> GuardDecision {
        if access == Access::Public {
            return GuardDecision::Allow;
        }

        self.session.wait_for_auth_ready().await;
        let decision = decide(&self.session, route, access);

        if !decision.is_allowed() {
            tracing::debug!(route, ?access, ?decision, "route guard denied navigation");
        }
        decision
    }
}

fn decide(session: &SessionState, route: &str, access: Access) -> GuardDecision {
    if !session.is_authenticated() {
        return GuardDecision::RedirectToLogin {
            return_to: route.to_string(),
        };
    }

    match access {
        Access::Admin if !session.is_admin() => GuardDecision::Forbidden,
        _ => GuardDecision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use storefront_core::{AuthTokens, ClientConfig, RuntimeCapabilities, UserProfile};

    use super::*;
    use crate::api::{AuthApi, AuthError, LoginRequest, RegisterRequest};
    use crate::storage::{KeyValueStore, MemoryStorage, keys};

    struct StaticApi;

    #[async_trait]
    impl AuthApi for StaticApi {
        async fn login(&self, request: &LoginRequest) -> Result<AuthTokens, AuthError> {
            let profile = UserProfile::new("7", request.username.as_str());
            let profile = if request.username == "admin" {
                profile.with_role("ADMIN")
            } else {
                profile
            };
            Ok(AuthTokens::new("A1", Some("R1".into())).with_user(profile))
        }

        async fn register(&self, _request: &RegisterRequest) -> Result<AuthTokens, AuthError> {
            Err(AuthError::Rejected("closed".into()))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<AuthTokens, AuthError> {
            Err(AuthError::Rejected("expired".into()))
        }

        async fn fetch_profile(&self, _access_token: &str) -> Result<UserProfile, AuthError> {
            Err(AuthError::Rejected("unused".into()))
        }
    }

    fn guard_with(storage: Arc<MemoryStorage>) -> (Arc<SessionState>, RouteGuard) {
        let session = Arc::new(SessionState::new(
            Arc::new(StaticApi),
            storage,
            RuntimeCapabilities::ui(),
            &ClientConfig::default(),
        ));
        (session.clone(), RouteGuard::new(session))
    }

    #[tokio::test]
    async fn public_routes_do_not_wait_for_restore() {
        let (_session, guard) = guard_with(Arc::new(MemoryStorage::new()));
        assert_eq!(guard.check("/", Access::Public).await, GuardDecision::Allow);
    }

    #[tokio::test]
    async fn guard_waits_for_restore_before_deciding() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(keys::ACCESS_TOKEN, "A1").unwrap();
        let (session, guard) = guard_with(storage);

        let pending = tokio::spawn(async move { guard.check("/orders", Access::Authenticated).await });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        session.restore_from_storage().await;

        assert_eq!(pending.await.unwrap(), GuardDecision::Allow);
    }

    #[tokio::test]
    async fn anonymous_user_is_sent_to_login_with_return_target() {
        let (session, guard) = guard_with(Arc::new(MemoryStorage::new()));
        session.restore_from_storage().await;

        assert_eq!(
            guard.check("/wallet", Access::Authenticated).await,
            GuardDecision::RedirectToLogin {
                return_to: "/wallet".to_string()
            }
        );
    }

    #[tokio::test]
    async fn admin_routes_need_admin_role() {
        let (session, guard) = guard_with(Arc::new(MemoryStorage::new()));
        session.restore_from_storage().await;

        session.login(&LoginRequest::new("bob", "pw")).await.unwrap();
        assert_eq!(guard.check("/admin", Access::Admin).await, GuardDecision::Forbidden);

        session.login(&LoginRequest::new("admin", "pw")).await.unwrap();
        assert_eq!(guard.check("/admin", Access::Admin).await, GuardDecision::Allow);
    }
}
