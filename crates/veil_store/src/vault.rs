//! Vault: the in-memory key-wrapping key for encrypted records.
//!
//! Unlocked with a passphrase (Argon2id) or a raw key from an OS keyring.
//! Locking zeroizes the key; encrypted bucket operations fail with
//! `VaultLocked` until the next unlock.

use std::sync::Arc;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use veil_crypto::kdf::vault_key_from_passphrase;

use crate::error::StoreError;

/// Thread-safe vault handle. Cheap to clone.
#[derive(Clone, Default)]
pub struct Vault {
    key: Arc<RwLock<Option<Zeroizing<[u8; 32]>>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the wrapping key from a passphrase + persisted salt.
    pub fn unlock(&self, passphrase: &[u8], salt: &[u8; 16]) -> Result<(), StoreError> {
        let vault_key = vault_key_from_passphrase(passphrase, salt)?;
        *self.key.write() = Some(Zeroizing::new(vault_key.0));
        Ok(())
    }

    /// Unlock with an existing 32-byte key (e.g. from an OS keyring).
    pub fn unlock_with_key(&self, key: [u8; 32]) {
        *self.key.write() = Some(Zeroizing::new(key));
    }

    /// Lock the vault; the key is zeroized.
    pub fn lock(&self) {
        *self.key.write() = None;
    }

    pub fn is_locked(&self) -> bool {
        self.key.read().is_none()
    }

    /// Run an operation with the raw key, failing if locked.
    pub fn with_key<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, StoreError>,
    {
        let guard = self.key.read();
        match guard.as_ref() {
            Some(key) => f(key),
            None => Err(StoreError::VaultLocked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_crypto::kdf::generate_salt;

    #[test]
    fn locked_by_default() {
        let vault = Vault::new();
        assert!(vault.is_locked());
        assert!(matches!(
            vault.with_key(|_| Ok(())),
            Err(StoreError::VaultLocked)
        ));
    }

    #[test]
    fn unlock_lock_cycle() {
        let vault = Vault::new();
        let salt = generate_salt();
        vault.unlock(b"correct horse battery staple", &salt).unwrap();
        assert!(!vault.is_locked());
        vault.with_key(|key| {
            assert_ne!(key, &[0u8; 32]);
            Ok(())
        })
        .unwrap();
        vault.lock();
        assert!(vault.is_locked());
    }

    #[test]
    fn same_passphrase_same_key() {
        let salt = generate_salt();
        let v1 = Vault::new();
        let v2 = Vault::new();
        v1.unlock(b"pass", &salt).unwrap();
        v2.unlock(b"pass", &salt).unwrap();
        let k1 = v1.with_key(|k| Ok(*k)).unwrap();
        let k2 = v2.with_key(|k| Ok(*k)).unwrap();
        assert_eq!(k1, k2);
    }
}
