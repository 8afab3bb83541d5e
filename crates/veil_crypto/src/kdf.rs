//! Key derivation functions
//!
//! `derive` — HKDF-SHA512 extract-and-expand; every symmetric key in the
//!   channel (AEAD keys, challenges) comes out of this one function.
//!
//! `root_kdf` / `chain_kdf` — the ratchet's HKDF-SHA256 derivations with
//!   fixed info labels.
//!
//! `vault_key_from_passphrase` — Argon2id, derives the 32-byte key-wrapping
//!   key for encrypted trust-store records.

use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use sha2::{Sha256, Sha512};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Info label mixed into every root-chain derivation.
const ROOT_INFO: &[u8] = b"DR:root";
/// Info label for the per-message symmetric chain step.
const CHAIN_INFO: &[u8] = b"DR:chain";

/// Expand `(key, salt, info)` into `len` bytes of output key material.
///
/// `salt` may be empty (HKDF substitutes a zeroed salt). The only failure
/// mode is structural: asking for more output than HKDF-SHA512 can produce
/// (255 * 64 bytes).
pub fn derive(
    key: &[u8],
    salt: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = Hkdf::<Sha512>::new(salt, key);
    let mut okm = Zeroizing::new(vec![0u8; len]);
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Root-chain step: mix a fresh DH output into the root key.
///
/// Returns `(new_root, chain_a, chain_b)`. Which chain becomes the sending
/// chain is decided by the caller from the deterministic initiator flag, so
/// both sides end up with swapped assignments without any role signal.
pub fn root_kdf(
    root: &[u8; 32],
    dh_shared: &[u8; 32],
    session_id: &str,
) -> Result<([u8; 32], [u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(root), dh_shared);
    let mut info = Vec::with_capacity(ROOT_INFO.len() + session_id.len());
    info.extend_from_slice(ROOT_INFO);
    info.extend_from_slice(session_id.as_bytes());

    let mut okm = Zeroizing::new([0u8; 96]);
    hk.expand(&info, okm.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let mut new_root = [0u8; 32];
    let mut chain_a = [0u8; 32];
    let mut chain_b = [0u8; 32];
    new_root.copy_from_slice(&okm[..32]);
    chain_a.copy_from_slice(&okm[32..64]);
    chain_b.copy_from_slice(&okm[64..]);
    Ok((new_root, chain_a, chain_b))
}

/// Symmetric chain step: `chain_key → (next_chain_key, message_key)`.
///
/// The caller must overwrite the old chain key with the returned successor;
/// the message key is used for exactly one AEAD operation and discarded.
pub fn chain_kdf(chain_key: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, chain_key);
    let mut okm = Zeroizing::new([0u8; 64]);
    hk.expand(CHAIN_INFO, okm.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let mut next = [0u8; 32];
    let mut mk = [0u8; 32];
    next.copy_from_slice(&okm[..32]);
    mk.copy_from_slice(&okm[32..]);
    Ok((next, mk))
}

// ── Vault key (Argon2id) ──────────────────────────────────────────────────────

/// 32-byte key-wrapping key derived from a user passphrase. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct VaultKey(pub [u8; 32]);

/// Argon2id parameters tuned for interactive use.
fn argon2_params() -> Params {
    Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost
        1,         // p_cost
        Some(32),
    )
    .expect("static Argon2 params are always valid")
}

/// Derive the record-encryption key from a passphrase + 16-byte salt.
/// The salt is stored next to the encrypted records (not secret).
pub fn vault_key_from_passphrase(
    passphrase: &[u8],
    salt: &[u8; 16],
) -> Result<VaultKey, CryptoError> {
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(VaultKey(output))
}

/// Fresh random 16-byte salt (generate once, persist alongside the store).
pub fn generate_salt() -> [u8; 16] {
    use rand::RngCore;
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = derive(b"secret", b"salt", b"info", 32).unwrap();
        let b = derive(b"secret", b"salt", b"info", 32).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn derive_separates_inputs() {
        let base = derive(b"secret", b"salt", b"info", 32).unwrap();
        let other_key = derive(b"secret2", b"salt", b"info", 32).unwrap();
        let other_salt = derive(b"secret", b"salt2", b"info", 32).unwrap();
        let other_info = derive(b"secret", b"salt", b"info2", 32).unwrap();
        assert_ne!(base.as_slice(), other_key.as_slice());
        assert_ne!(base.as_slice(), other_salt.as_slice());
        assert_ne!(base.as_slice(), other_info.as_slice());
    }

    #[test]
    fn derive_rejects_oversized_request() {
        // HKDF-SHA512 caps output at 255 * 64 bytes.
        assert!(derive(b"k", b"", b"i", 255 * 64 + 1).is_err());
        assert!(derive(b"k", b"", b"i", 255 * 64).is_ok());
    }

    #[test]
    fn root_kdf_outputs_are_distinct() {
        let (root, a, b) = root_kdf(&[1u8; 32], &[2u8; 32], "session").unwrap();
        assert_ne!(root, a);
        assert_ne!(root, b);
        assert_ne!(a, b);
    }

    #[test]
    fn root_kdf_binds_session_id() {
        let one = root_kdf(&[1u8; 32], &[2u8; 32], "session-a").unwrap();
        let two = root_kdf(&[1u8; 32], &[2u8; 32], "session-b").unwrap();
        assert_ne!(one.0, two.0);
    }

    #[test]
    fn chain_kdf_advances() {
        let ck = [7u8; 32];
        let (next, mk) = chain_kdf(&ck).unwrap();
        assert_ne!(next, ck);
        assert_ne!(mk, ck);
        assert_ne!(next, mk);
        // Deterministic: same chain key, same step.
        let (next2, mk2) = chain_kdf(&ck).unwrap();
        assert_eq!(next, next2);
        assert_eq!(mk, mk2);
    }
}
