//! In-memory credential record mirrored to durable storage.

use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use storefront_core::{CredentialRecord, UserProfile};

use crate::storage::{KeyValueStore, keys};

/// Holds the current credential record.
///
/// Pure data holder: no network calls. Readers get cloned snapshots; writers
/// (only [`crate::SessionState`]) swap the whole record under one write lock
/// and persist it before releasing the lock, so memory and storage never
/// disagree about which record is current.
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStore>,
    record: RwLock<CredentialRecord>,
}

/// Outcome of reading persisted credentials.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Restored {
    pub record: CredentialRecord,
    /// The persisted profile was present but not parseable.
    pub profile_corrupted: bool,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            record: RwLock::new(CredentialRecord::default()),
        }
    }

    pub fn snapshot(&self) -> CredentialRecord {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.snapshot().access_token
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.snapshot().refresh_token
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.snapshot().profile
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.storage
    }

    /// Load persisted credentials into memory.
    pub(crate) fn load(&self) -> Restored {
        let access_token = self.storage.get(keys::ACCESS_TOKEN);
        let refresh_token = self.storage.get(keys::REFRESH_TOKEN);

        let mut profile_corrupted = false;
        let profile = self.storage.get(keys::CURRENT_USER).and_then(|raw| {
            match serde_json::from_str::<UserProfile>(&raw) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    tracing::warn!(error = %e, "stored profile is not valid JSON; ignoring it");
                    profile_corrupted = true;
                    None
                }
            }
        });

        let record = CredentialRecord {
            access_token,
            refresh_token,
            profile,
        };
        *self.write() = record.clone();

        Restored {
            record,
            profile_corrupted,
        }
    }

    pub(crate) fn replace(&self, record: CredentialRecord) {
        let mut current = self.write();
        self.persist(&record);
        *current = record;
    }

    /// Derive the next record from the current one and install it atomically.
    pub(crate) fn update<F>(&self, f: F) -> CredentialRecord
    where
        F: FnOnce(&CredentialRecord) -> CredentialRecord,
    {
        let mut current = self.write();
        let next = f(&current);
        self.persist(&next);
        *current = next.clone();
        next
    }

    pub(crate) fn clear(&self) {
        self.replace(CredentialRecord::default());
    }

    fn write(&self) -> RwLockWriteGuard<'_, CredentialRecord> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }

    // Storage failures are logged, not raised: the in-memory record stays
    // authoritative for this process.
    fn persist(&self, record: &CredentialRecord) {
        self.persist_value(keys::ACCESS_TOKEN, record.access_token.clone());
        self.persist_value(keys::REFRESH_TOKEN, record.refresh_token.clone());

        let profile = match record.profile.as_ref().map(serde_json::to_string).transpose() {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode profile for storage");
                None
            }
        };
        self.persist_value(keys::CURRENT_USER, profile);
    }

    fn persist_value(&self, key: &str, value: Option<String>) {
        let result = match value {
            Some(value) => self.storage.set(key, &value),
            None => self.storage.remove(key),
        };
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "failed to persist credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> (Arc<MemoryStorage>, CredentialStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone());
        (storage, store)
    }

    #[test]
    fn replace_persists_every_field() {
        let (storage, store) = store();
        store.replace(CredentialRecord::new(
            "a1",
            Some("r1".into()),
            Some(UserProfile::new("1", "alice")),
        ));

        assert_eq!(storage.get(keys::ACCESS_TOKEN).as_deref(), Some("a1"));
        assert_eq!(storage.get(keys::REFRESH_TOKEN).as_deref(), Some("r1"));
        assert!(storage.get(keys::CURRENT_USER).unwrap().contains("alice"));
    }

    #[test]
    fn load_reads_back_what_was_persisted() {
        let (storage, store) = store();
        store.replace(CredentialRecord::new("a1", Some("r1".into()), Some(UserProfile::new("1", "alice"))));

        let fresh = CredentialStore::new(storage);
        let restored = fresh.load();

        assert!(!restored.profile_corrupted);
        assert_eq!(restored.record, fresh.snapshot());
        assert_eq!(fresh.profile().unwrap().username, "alice");
    }

    #[test]
    fn corrupted_profile_keeps_tokens() {
        let (storage, store) = store();
        storage.set(keys::ACCESS_TOKEN, "a1").unwrap();
        storage.set(keys::REFRESH_TOKEN, "r1").unwrap();
        storage.set(keys::CURRENT_USER, "{{not-json").unwrap();

        let restored = store.load();

        assert!(restored.profile_corrupted);
        assert_eq!(restored.record.access_token.as_deref(), Some("a1"));
        assert_eq!(restored.record.refresh_token.as_deref(), Some("r1"));
        assert_eq!(restored.record.profile, None);
    }

    #[test]
    fn update_replaces_access_token_only() {
        let (storage, store) = store();
        store.replace(CredentialRecord::new("a1", Some("r1".into()), None));

        store.update(|current| current.with_access_token("a2"));

        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
        assert_eq!(storage.get(keys::ACCESS_TOKEN).as_deref(), Some("a2"));
    }

    #[test]
    fn clear_removes_every_key() {
        let (storage, store) = store();
        store.replace(CredentialRecord::new("a1", Some("r1".into()), Some(UserProfile::new("1", "a"))));

        store.clear();

        assert!(store.snapshot().is_empty());
        assert_eq!(storage.get(keys::ACCESS_TOKEN), None);
        assert_eq!(storage.get(keys::REFRESH_TOKEN), None);
        assert_eq!(storage.get(keys::CURRENT_USER), None);
    }
}
