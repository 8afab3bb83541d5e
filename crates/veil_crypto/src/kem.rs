//! Post-quantum key encapsulation (ML-KEM-768).
//!
//! One ephemeral keypair per handshake: the initiator sends its public key,
//! the responder encapsulates against it, and both sides end up with the
//! same 32-byte shared secret. Keypair and secret live only until the
//! session ciphers are derived.

use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SharedSecret as _};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Length of the encapsulated shared secret.
pub const SHARED_SECRET_LEN: usize = 32;

/// Ephemeral ML-KEM-768 keypair held by the handshake initiator.
pub struct KemKeyPair {
    public: mlkem768::PublicKey,
    secret: mlkem768::SecretKey,
}

impl KemKeyPair {
    pub fn generate() -> Self {
        let (public, secret) = mlkem768::keypair();
        Self { public, secret }
    }

    /// Public key bytes to send to the peer.
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    /// Recover the shared secret from the peer's ciphertext.
    pub fn decapsulate(
        &self,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<[u8; SHARED_SECRET_LEN]>, CryptoError> {
        let ct = mlkem768::Ciphertext::from_bytes(ciphertext)
            .map_err(|e| CryptoError::Kem(format!("malformed ciphertext: {e}")))?;
        let shared = mlkem768::decapsulate(&ct, &self.secret);
        copy_shared(shared.as_bytes())
    }
}

/// Encapsulate against a peer's public key, producing the shared secret and
/// the ciphertext to send back.
pub fn encapsulate(
    public: &[u8],
) -> Result<(Zeroizing<[u8; SHARED_SECRET_LEN]>, Vec<u8>), CryptoError> {
    let pk = mlkem768::PublicKey::from_bytes(public)
        .map_err(|e| CryptoError::Kem(format!("malformed public key: {e}")))?;
    let (shared, ct) = mlkem768::encapsulate(&pk);
    Ok((copy_shared(shared.as_bytes())?, ct.as_bytes().to_vec()))
}

fn copy_shared(bytes: &[u8]) -> Result<Zeroizing<[u8; SHARED_SECRET_LEN]>, CryptoError> {
    if bytes.len() != SHARED_SECRET_LEN {
        return Err(CryptoError::Kem(format!(
            "shared secret must be {SHARED_SECRET_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = Zeroizing::new([0u8; SHARED_SECRET_LEN]);
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulation_agrees() {
        let pair = KemKeyPair::generate();
        let (shared_enc, ct) = encapsulate(&pair.public_bytes()).unwrap();
        let shared_dec = pair.decapsulate(&ct).unwrap();
        assert_eq!(shared_enc.as_ref(), shared_dec.as_ref());
    }

    #[test]
    fn fresh_keypairs_differ() {
        let a = KemKeyPair::generate();
        let b = KemKeyPair::generate();
        assert_ne!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn malformed_inputs_rejected() {
        let pair = KemKeyPair::generate();
        assert!(encapsulate(b"not a key").is_err());
        assert!(pair.decapsulate(b"not a ciphertext").is_err());
    }
}
