use keyring::Entry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};

const SERVICE_NAME: &str = "shelfsync";
const INDEX_KEY: &str = "connections";

/// Everything needed to talk to one server on behalf of one user. Stored as
/// JSON in the platform keychain, never in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCredentials {
    pub id: String,
    pub host: String,
    pub username: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Extra headers sent with every request, e.g. for reverse proxies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_identity: Option<String>,
}

/// Stable identifier for a (host, username) pair. Whitespace around the host
/// is ignored so a trailing newline from a paste doesn't fork the identity.
pub fn connection_id(host: &str, username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(username.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Secret persistence seam. The production backend is the OS keychain; tests
/// swap in an in-memory map.
pub trait SecretBackend: Send + Sync {
    fn store(&self, key: &str, value: &str) -> Result<()>;
    fn retrieve(&self, key: &str) -> Result<Option<String>>;
    fn delete(&self, key: &str) -> Result<()>;
}

pub struct KeyringBackend;

impl SecretBackend for KeyringBackend {
    fn store(&self, key: &str, value: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, key)
            .map_err(|e| SyncError::KeychainInsert(e.to_string()))?;
        entry
            .set_password(value)
            .map_err(|e| SyncError::KeychainInsert(e.to_string()))
    }

    fn retrieve(&self, key: &str) -> Result<Option<String>> {
        let entry = Entry::new(SERVICE_NAME, key)
            .map_err(|e| SyncError::KeychainRetrieve(e.to_string()))?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SyncError::KeychainRetrieve(e.to_string())),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, key)
            .map_err(|e| SyncError::KeychainInsert(e.to_string()))?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SyncError::KeychainInsert(e.to_string())),
        }
    }
}

/// Credential registry on top of a [`SecretBackend`]. One entry per
/// connection plus an index entry listing known connection ids, since the
/// keychain itself cannot be enumerated.
pub struct CredentialStore {
    backend: Box<dyn SecretBackend>,
}

impl CredentialStore {
    pub fn new(backend: Box<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    pub fn keychain() -> Self {
        Self::new(Box::new(KeyringBackend))
    }

    pub fn insert(&self, credentials: &ConnectionCredentials) -> Result<()> {
        let json = serde_json::to_string(credentials)?;
        self.backend.store(&credentials.id, &json)?;
        let mut index = self.index()?;
        if !index.contains(&credentials.id) {
            index.push(credentials.id.clone());
            self.write_index(&index)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<ConnectionCredentials>> {
        match self.backend.retrieve(id)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.backend.delete(id)?;
        let index: Vec<String> = self
            .index()?
            .into_iter()
            .filter(|known| known != id)
            .collect();
        self.write_index(&index)
    }

    /// All stored credentials, skipping index entries whose secret is gone.
    pub fn list(&self) -> Result<Vec<ConnectionCredentials>> {
        let mut out = Vec::new();
        for id in self.index()? {
            match self.get(&id)? {
                Some(credentials) => out.push(credentials),
                None => {
                    tracing::warn!(connection_id = %id, "indexed connection has no keychain entry");
                }
            }
        }
        Ok(out)
    }

    pub fn clear(&self) -> Result<()> {
        for id in self.index()? {
            self.backend.delete(&id)?;
        }
        self.backend.delete(INDEX_KEY)
    }

    fn index(&self) -> Result<Vec<String>> {
        match self.backend.retrieve(INDEX_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, index: &[String]) -> Result<()> {
        self.backend.store(INDEX_KEY, &serde_json::to_string(index)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct MemoryBackend {
        entries: Mutex<HashMap<String, String>>,
    }

    impl SecretBackend for MemoryBackend {
        fn store(&self, key: &str, value: &str) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn retrieve(&self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    pub(crate) fn credentials(host: &str, username: &str) -> ConnectionCredentials {
        ConnectionCredentials {
            id: connection_id(host, username),
            host: host.to_string(),
            username: username.to_string(),
            access_token: "token".to_string(),
            refresh_token: None,
            headers: Vec::new(),
            client_identity: None,
        }
    }

    #[test]
    fn connection_id_ignores_host_whitespace_but_not_username() {
        assert_eq!(
            connection_id("https://abs.example \n", "alice"),
            connection_id("https://abs.example", "alice"),
        );
        assert_ne!(
            connection_id("https://abs.example", "alice"),
            connection_id("https://abs.example", "bob"),
        );
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let store = CredentialStore::new(Box::new(MemoryBackend::default()));
        let creds = credentials("https://abs.example", "alice");

        store.insert(&creds).unwrap();
        assert_eq!(store.get(&creds.id).unwrap(), Some(creds.clone()));
        assert_eq!(store.list().unwrap().len(), 1);

        store.remove(&creds.id).unwrap();
        assert_eq!(store.get(&creds.id).unwrap(), None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn reinserting_does_not_duplicate_the_index() {
        let store = CredentialStore::new(Box::new(MemoryBackend::default()));
        let mut creds = credentials("https://abs.example", "alice");
        store.insert(&creds).unwrap();
        creds.access_token = "rotated".to_string();
        store.insert(&creds).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].access_token, "rotated");
    }

    #[test]
    fn clear_removes_everything() {
        let store = CredentialStore::new(Box::new(MemoryBackend::default()));
        store
            .insert(&credentials("https://abs.example", "alice"))
            .unwrap();
        store
            .insert(&credentials("https://abs.example", "bob"))
            .unwrap();
        store.clear().unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
