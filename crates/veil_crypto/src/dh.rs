//! X25519 keypairs for the ratchet's Diffie-Hellman steps.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// An owned X25519 keypair. The secret zeroizes on drop.
pub struct DhKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl DhKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from persisted bytes.
    ///
    /// The stored public key must match the secret; a mismatch means the
    /// persisted state was corrupted.
    pub fn restore(private: &[u8; 32], public: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = StaticSecret::from(*private);
        let derived = PublicKey::from(&secret);
        if derived.as_bytes() != public {
            return Err(CryptoError::InvalidKey(
                "X25519 public key does not match secret".into(),
            ));
        }
        Ok(Self {
            secret,
            public: derived,
        })
    }

    /// Scalar multiplication with the peer's public key.
    pub fn exchange(&self, their_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let peer = PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&peer);
        Zeroizing::new(shared.to_bytes())
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_agrees() {
        let a = DhKeyPair::generate();
        let b = DhKeyPair::generate();
        let ab = a.exchange(&b.public_bytes());
        let ba = b.exchange(&a.public_bytes());
        assert_eq!(ab.as_ref(), ba.as_ref());
    }

    #[test]
    fn restore_roundtrip() {
        let a = DhKeyPair::generate();
        let restored = DhKeyPair::restore(&a.private_bytes(), &a.public_bytes()).unwrap();
        assert_eq!(restored.public_bytes(), a.public_bytes());
    }

    #[test]
    fn restore_rejects_mismatched_public() {
        let a = DhKeyPair::generate();
        let b = DhKeyPair::generate();
        assert!(DhKeyPair::restore(&a.private_bytes(), &b.public_bytes()).is_err());
    }
}
