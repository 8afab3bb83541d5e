//! The trust store: peer records plus generic key-value buckets.
//!
//! Shared by every session on a node; all operations take the store's
//! read-write lock for at most the duration of the closure, never across
//! I/O or user interaction. Snapshots persist as JSON.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use veil_crypto::aead::SealedCipher;

use crate::{error::StoreError, models::PeerRecord, vault::Vault};

/// Domain-separation label for record encryption under the vault key.
const STORE_INFO: &[u8] = b"veil-store-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BucketEntry {
    /// base64url value; ciphertext when `encrypted`.
    value: String,
    encrypted: bool,
}

#[derive(Default, Serialize, Deserialize)]
struct StoreInner {
    /// Peer records keyed by the hex form of the 64-byte public-key hash.
    peers: HashMap<String, PeerRecord>,
    buckets: HashMap<String, HashMap<String, BucketEntry>>,
}

/// Central trust-store handle. Cheap to clone (Arc internally).
#[derive(Clone)]
pub struct TrustStore {
    inner: Arc<RwLock<StoreInner>>,
    vault: Vault,
    peer_expiry: Duration,
}

impl TrustStore {
    pub fn new(peer_expiry: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            vault: Vault::new(),
            peer_expiry,
        }
    }

    /// Load a previously saved snapshot.
    pub fn load(path: &Path, peer_expiry: Duration) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path)?;
        let inner: StoreInner = serde_json::from_slice(&bytes)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            vault: Vault::new(),
            peer_expiry,
        })
    }

    /// Persist the current snapshot. Encrypted records stay encrypted.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&*self.inner.read())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    // ── Peer records ─────────────────────────────────────────────────────

    /// Look up a peer by the 64-byte hash of its public key.
    ///
    /// An expired record is purged here, on read, and reported as such so
    /// the caller can distinguish "never seen" from "seen too long ago".
    pub fn find_peer(&self, key_hash: &[u8]) -> Result<PeerRecord, StoreError> {
        let hash_hex = hex::encode(key_hash);
        let mut inner = self.inner.write();
        let record = inner.peers.get(&hash_hex).ok_or(StoreError::NotFound)?;
        if self.is_expired(record) {
            inner.peers.remove(&hash_hex);
            tracing::debug!(peer = %hash_hex, "purged expired peer record");
            return Err(StoreError::Expired);
        }
        Ok(record.clone())
    }

    pub fn store_peer(&self, record: PeerRecord) {
        let key = record.key_hash_hex();
        self.inner.write().peers.insert(key, record);
    }

    fn is_expired(&self, record: &PeerRecord) -> bool {
        match chrono::Duration::from_std(self.peer_expiry) {
            Ok(ttl) => Utc::now() - record.first_seen > ttl,
            Err(_) => false,
        }
    }

    // ── Scoped transactions ──────────────────────────────────────────────

    /// Run a read-only transaction against the store.
    pub fn query<R>(&self, f: impl FnOnce(&StoreView<'_>) -> R) -> R {
        let inner = self.inner.read();
        f(&StoreView { inner: &inner })
    }

    /// Run a read-write transaction against the store.
    pub fn command<R>(&self, f: impl FnOnce(&mut StoreCommand<'_>) -> R) -> R {
        let mut inner = self.inner.write();
        f(&mut StoreCommand { inner: &mut inner })
    }

    // ── Buckets ──────────────────────────────────────────────────────────

    pub fn add_plain(&self, bucket: &str, key: &str, value: &[u8]) {
        self.inner
            .write()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                BucketEntry {
                    value: URL_SAFE_NO_PAD.encode(value),
                    encrypted: false,
                },
            );
    }

    pub fn get_plain(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let entry = self.get_entry(bucket, key)?;
        if entry.encrypted {
            return Err(StoreError::InvalidRecord(
                "record is encrypted; use get_encrypted".into(),
            ));
        }
        URL_SAFE_NO_PAD
            .decode(&entry.value)
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))
    }

    /// Store a value encrypted under the vault key. Fails when locked.
    pub fn add_encrypted(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let ciphertext = self.vault.with_key(|vault_key| {
            let cipher = SealedCipher::new(vault_key, &[], STORE_INFO)?;
            Ok(cipher.encrypt(value)?)
        })?;
        self.inner
            .write()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                BucketEntry {
                    value: URL_SAFE_NO_PAD.encode(ciphertext),
                    encrypted: true,
                },
            );
        Ok(())
    }

    pub fn get_encrypted(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let entry = self.get_entry(bucket, key)?;
        if !entry.encrypted {
            return Err(StoreError::InvalidRecord(
                "record is not encrypted; use get_plain".into(),
            ));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(&entry.value)
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        self.vault.with_key(|vault_key| {
            let cipher = SealedCipher::new(vault_key, &[], STORE_INFO)?;
            Ok(cipher.decrypt(&ciphertext)?.to_vec())
        })
    }

    pub fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.remove(key))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn get_entry(&self, bucket: &str, key: &str) -> Result<BucketEntry, StoreError> {
        self.inner
            .read()
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

/// Read view handed to [`TrustStore::query`] closures.
pub struct StoreView<'a> {
    inner: &'a StoreInner,
}

impl StoreView<'_> {
    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.inner.peers.values()
    }

    pub fn peer_by_hash(&self, key_hash: &[u8]) -> Option<&PeerRecord> {
        self.inner.peers.get(&hex::encode(key_hash))
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.inner
            .buckets
            .get(bucket)
            .is_some_and(|b| b.contains_key(key))
    }
}

/// Write view handed to [`TrustStore::command`] closures.
pub struct StoreCommand<'a> {
    inner: &'a mut StoreInner,
}

impl StoreCommand<'_> {
    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.inner.peers.values()
    }

    pub fn insert_peer(&mut self, record: PeerRecord) {
        self.inner.peers.insert(record.key_hash_hex(), record);
    }

    pub fn remove_peer(&mut self, key_hash: &[u8]) -> Option<PeerRecord> {
        self.inner.peers.remove(&hex::encode(key_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_crypto::identity::SignatureAlgorithm;

    fn store() -> TrustStore {
        TrustStore::new(Duration::from_secs(3600))
    }

    fn peer(name: &str) -> PeerRecord {
        PeerRecord::new(
            name.into(),
            SignatureAlgorithm::Ed25519,
            name.as_bytes().to_vec(),
        )
    }

    #[test]
    fn find_peer_roundtrip() {
        let store = store();
        let record = peer("alice");
        let hash = record.key_hash();
        store.store_peer(record);

        let found = store.find_peer(&hash).unwrap();
        assert_eq!(found.name, "alice");
        assert!(matches!(
            store.find_peer(&[0u8; 64]),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn expired_peer_purged_on_read() {
        let store = TrustStore::new(Duration::from_secs(0));
        let mut record = peer("bob");
        record.first_seen = Utc::now() - chrono::Duration::seconds(10);
        let hash = record.key_hash();
        store.store_peer(record);

        assert!(matches!(store.find_peer(&hash), Err(StoreError::Expired)));
        // Second read: the record is gone entirely.
        assert!(matches!(store.find_peer(&hash), Err(StoreError::NotFound)));
    }

    #[test]
    fn plain_bucket_roundtrip() {
        let store = store();
        store.add_plain("settings", "listen", b"127.0.0.1:7000");
        assert_eq!(
            store.get_plain("settings", "listen").unwrap(),
            b"127.0.0.1:7000"
        );
        store.delete("settings", "listen").unwrap();
        assert!(matches!(
            store.get_plain("settings", "listen"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn encrypted_bucket_requires_unlocked_vault() {
        let store = store();
        assert!(matches!(
            store.add_encrypted("identities", "me", b"secret"),
            Err(StoreError::VaultLocked)
        ));

        store.vault().unlock_with_key([7u8; 32]);
        store.add_encrypted("identities", "me", b"secret").unwrap();
        assert_eq!(store.get_encrypted("identities", "me").unwrap(), b"secret");

        // Mixing access modes is an error, not a silent decode.
        assert!(store.get_plain("identities", "me").is_err());

        store.vault().lock();
        assert!(matches!(
            store.get_encrypted("identities", "me"),
            Err(StoreError::VaultLocked)
        ));
    }

    #[test]
    fn query_and_command_transactions() {
        let store = store();
        store.command(|tx| {
            tx.insert_peer(peer("carol"));
            tx.insert_peer(peer("dave"));
        });
        let names: Vec<String> = store.query(|view| {
            let mut names: Vec<String> = view.peers().map(|p| p.name.clone()).collect();
            names.sort();
            names
        });
        assert_eq!(names, ["carol", "dave"]);
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = store();
        store.store_peer(peer("erin"));
        store.add_plain("settings", "k", b"v");
        store.save(&path).unwrap();

        let loaded = TrustStore::load(&path, Duration::from_secs(3600)).unwrap();
        assert_eq!(loaded.get_plain("settings", "k").unwrap(), b"v");
        assert_eq!(loaded.query(|v| v.peers().count()), 1);
    }
}
