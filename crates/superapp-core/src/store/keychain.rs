use async_trait::async_trait;
use keyring::Entry;

use super::{validate_key, KeyValueStore, StoreError};

/// Default keychain service name.
pub const SERVICE_NAME: &str = "superapp";

/// Account used to check that the keychain keeps what it is given.
const PERSISTENCE_CHECK_ACCOUNT: &str = "persistence-check";

/// Stores each key as a password entry in the OS keychain.
///
/// Keychain calls are blocking, so they run on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Open the keychain under `service`.
    ///
    /// Fails when the platform has no keychain that keeps entries, such as a
    /// headless Linux box without a Secret Service daemon. Blocks briefly.
    pub fn open(service: &str) -> Result<Self, StoreError> {
        let persists = entries_persist(|| Entry::new(service, PERSISTENCE_CHECK_ACCOUNT))?;
        if !persists {
            return Err(StoreError::Unavailable(format!(
                "keychain for service {} does not keep entries",
                service
            )));
        }
        Ok(Self {
            service: service.to_string(),
        })
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        validate_key(key)?;
        let service = self.service.clone();
        let account = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &account)?;
            op(entry)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("keychain task failed: {}", e)))?
        .map_err(StoreError::from)
    }
}

/// Write an entry, read it back through a fresh handle, then delete it.
fn entries_persist(open: impl Fn() -> keyring::Result<Entry>) -> Result<bool, StoreError> {
    open()?.set_password("1")?;
    let persisted = match open()?.get_password() {
        Ok(_) => true,
        Err(keyring::Error::NoEntry) => false,
        Err(e) => return Err(e.into()),
    };
    match open()?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(persisted),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KeyValueStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = value.to_string();
        self.with_entry(key, move |entry| entry.set_password(&value))
            .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use keyring::credential::CredentialBuilderApi;

    use super::*;

    #[test]
    fn test_detects_keychain_that_forgets() {
        // keyring's mock hands every entry a fresh, empty credential
        let builder = keyring::mock::default_credential_builder();
        let persists = entries_persist(|| {
            Ok(Entry::new_with_credential(builder.build(None, "superapp-test", "user")?))
        })
        .unwrap();
        assert!(!persists);
    }

    /// Only does anything where a real keychain is reachable.
    #[tokio::test]
    async fn test_round_trip_on_real_keychain() {
        let store = match KeyringStore::open("superapp-test") {
            Ok(store) => store,
            Err(e) => {
                eprintln!("no usable keychain, skipping: {}", e);
                return;
            }
        };

        store.set("user", "{\"id\":\"1\"}").await.unwrap();
        assert_eq!(store.get("user").await.unwrap().as_deref(), Some("{\"id\":\"1\"}"));

        // A second handle sees the same entry
        let reopened = KeyringStore::open("superapp-test").unwrap();
        assert_eq!(reopened.get("user").await.unwrap().as_deref(), Some("{\"id\":\"1\"}"));

        store.remove("user").await.unwrap();
        assert_eq!(store.get("user").await.unwrap(), None);
        store.remove("user").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_bad_keys() {
        let store = KeyringStore {
            service: SERVICE_NAME.to_string(),
        };
        assert!(matches!(store.get("a b").await, Err(StoreError::InvalidKey(_))));
    }
}
