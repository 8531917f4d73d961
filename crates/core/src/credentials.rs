use serde::{Deserialize, Serialize};

use crate::UserProfile;

/// Credentials held for the current user.
///
/// The record is always replaced as a whole value so a reader never observes a
/// half-applied update (new access token with the old refresh token already
/// gone, etc).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub profile: Option<UserProfile>,
}

impl CredentialRecord {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        profile: Option<UserProfile>,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token,
            profile,
        }
    }

    /// A caller without an access token is unauthenticated, even when a
    /// refresh token is still around.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.profile.is_none()
    }

    /// Copy of this record with the access token replaced; the refresh token
    /// and profile are kept.
    pub fn with_access_token(&self, access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_token_alone_is_not_authenticated() {
        let record = CredentialRecord {
            access_token: None,
            refresh_token: Some("r1".into()),
            profile: None,
        };

        assert!(!record.is_authenticated());
        assert!(record.has_refresh_token());
        assert!(!record.is_empty());
    }

    #[test]
    fn replacing_access_token_keeps_refresh_token() {
        let record = CredentialRecord::new("a1", Some("r1".into()), None);
        let refreshed = record.with_access_token("a2");

        assert_eq!(refreshed.access_token.as_deref(), Some("a2"));
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r1"));
    }
}
