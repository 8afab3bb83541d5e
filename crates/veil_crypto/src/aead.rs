//! Authenticated encryption
//!
//! XChaCha20-Poly1305 (192-bit nonce). Key size: 32 bytes. Nonce: 24 bytes
//! (random per encryption). Tag: 16 bytes.
//!
//! Ciphertext wire format:
//!   [ nonce (24 bytes) | ciphertext + tag ]
//!
//! The random extended nonce makes collisions negligible without any
//! per-cipher counter state.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305,
};
use zeroize::Zeroizing;

use crate::{error::CryptoError, kdf};

/// Nonce length prefixed to every ciphertext.
pub const NONCE_LEN: usize = 24;

/// An AEAD cipher bound to a key derived from `(secret, salt, info)`.
///
/// One instance per direction per session; the `info` string carries the
/// session id and direction so keys never collide across sessions.
pub struct SealedCipher {
    key: Zeroizing<[u8; 32]>,
}

impl SealedCipher {
    /// Derive the 32-byte cipher key via HKDF-SHA512 and bind it.
    pub fn new(secret: &[u8], salt: &[u8], info: &[u8]) -> Result<Self, CryptoError> {
        let okm = kdf::derive(secret, salt, info, 32)?;
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&okm);
        Ok(Self { key })
    }

    /// Encrypt `plaintext`, prepending a fresh random 24-byte nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new_from_slice(self.key.as_ref())
            .map_err(|_| CryptoError::AeadEncrypt)?;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::AeadEncrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt wire-format bytes (nonce || ciphertext+tag).
    pub fn decrypt(&self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::InvalidCiphertext);
        }
        let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
        let nonce = chacha20poly1305::XNonce::from_slice(nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(self.key.as_ref())
            .map_err(|_| CryptoError::InvalidCiphertext)?;

        let plaintext = cipher
            .decrypt(nonce, ct)
            .map_err(|_| CryptoError::InvalidCiphertext)?;

        Ok(Zeroizing::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SealedCipher {
        SealedCipher::new(b"shared secret", b"0123456789abcdef", b"sess-test").unwrap()
    }

    #[test]
    fn roundtrip() {
        let c = cipher();
        let ct = c.encrypt(b"hello").unwrap();
        assert_eq!(c.decrypt(&ct).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn nonce_randomisation() {
        let c = cipher();
        let a = c.encrypt(b"same plaintext").unwrap();
        let b = c.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampering_detected() {
        let c = cipher();
        let mut ct = c.encrypt(b"payload").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(matches!(
            c.decrypt(&ct),
            Err(CryptoError::InvalidCiphertext)
        ));
    }

    #[test]
    fn short_input_rejected() {
        let c = cipher();
        assert!(matches!(
            c.decrypt(&[0u8; NONCE_LEN - 1]),
            Err(CryptoError::InvalidCiphertext)
        ));
    }

    #[test]
    fn distinct_info_means_distinct_keys() {
        let a = SealedCipher::new(b"secret", b"salt", b"sess-a").unwrap();
        let b = SealedCipher::new(b"secret", b"salt", b"sess-b").unwrap();
        let ct = a.encrypt(b"msg").unwrap();
        assert!(b.decrypt(&ct).is_err());
    }
}
