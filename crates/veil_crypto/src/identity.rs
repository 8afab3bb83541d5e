//! Long-term signing identities.
//!
//! Each peer owns one identity keypair, created once and loaded from the
//! encrypted store at startup; the private half never leaves the machine.
//! Two algorithm variants exist behind one enum:
//!
//! - `Ed25519`  — classical EdDSA over Curve25519. Private keys serialise
//!   as PKCS#8 DER, public keys as PKIX SubjectPublicKeyInfo DER.
//! - `MlDsa65`  — module-lattice signatures (ML-DSA-65). Both halves use
//!   the scheme's canonical binary form.
//!
//! The variant is chosen at session creation and carried by name on the
//! wire, so a verifier always knows which parser to apply to the advertised
//! public key.

use ed25519_dalek::{
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    Signature, Signer, SigningKey, Verifier as _, VerifyingKey,
};
use pqcrypto_mldsa::mldsa65;
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Wire tag naming the signature scheme of an advertised public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    Ed25519,
    MlDsa65,
}

impl SignatureAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::MlDsa65 => "mldsa65",
        }
    }

    pub fn parse(name: &str) -> Result<Self, CryptoError> {
        match name {
            "ed25519" => Ok(Self::Ed25519),
            "mldsa65" => Ok(Self::MlDsa65),
            other => Err(CryptoError::InvalidKey(format!(
                "unknown signature algorithm {other:?}"
            ))),
        }
    }
}

/// A long-term identity keypair.
pub enum Identity {
    Ed25519(Ed25519Identity),
    MlDsa65(MlDsa65Identity),
}

impl Identity {
    pub fn generate(algorithm: SignatureAlgorithm) -> Self {
        match algorithm {
            SignatureAlgorithm::Ed25519 => Self::Ed25519(Ed25519Identity::generate()),
            SignatureAlgorithm::MlDsa65 => Self::MlDsa65(MlDsa65Identity::generate()),
        }
    }

    /// Rebuild an identity from its serialised private form.
    pub fn restore(algorithm: SignatureAlgorithm, private: &[u8]) -> Result<Self, CryptoError> {
        match algorithm {
            SignatureAlgorithm::Ed25519 => {
                Ok(Self::Ed25519(Ed25519Identity::from_pkcs8(private)?))
            }
            SignatureAlgorithm::MlDsa65 => {
                Ok(Self::MlDsa65(MlDsa65Identity::from_canonical(private)?))
            }
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Ed25519(_) => SignatureAlgorithm::Ed25519,
            Self::MlDsa65(_) => SignatureAlgorithm::MlDsa65,
        }
    }

    /// Sign arbitrary bytes with the private half.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Ed25519(id) => id.signing.sign(message).to_bytes().to_vec(),
            Self::MlDsa65(id) => {
                mldsa65::detached_sign(message, &id.secret).as_bytes().to_vec()
            }
        }
    }

    /// Public key in its wire serialisation (SPKI DER / canonical bytes).
    pub fn public_key_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::Ed25519(id) => id
                .signing
                .verifying_key()
                .to_public_key_der()
                .map(|doc| doc.into_vec())
                .map_err(|e| CryptoError::InvalidKey(e.to_string())),
            Self::MlDsa65(id) => Ok(id.public.as_bytes().to_vec()),
        }
    }

    /// Private key in its standard serialisation, for the encrypted store.
    pub fn serialize_private(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match self {
            Self::Ed25519(id) => {
                let doc = id
                    .signing
                    .to_pkcs8_der()
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Ok(Zeroizing::new(doc.as_bytes().to_vec()))
            }
            Self::MlDsa65(id) => {
                let mut out = Vec::with_capacity(
                    mldsa65::secret_key_bytes() + mldsa65::public_key_bytes(),
                );
                out.extend_from_slice(id.secret.as_bytes());
                out.extend_from_slice(id.public.as_bytes());
                Ok(Zeroizing::new(out))
            }
        }
    }
}

/// Verify `signature` over `message` against a wire-serialised public key.
pub fn verify(
    algorithm: SignatureAlgorithm,
    public: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    match algorithm {
        SignatureAlgorithm::Ed25519 => {
            let vk = VerifyingKey::from_public_key_der(public)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let sig = Signature::from_slice(signature)
                .map_err(|_| CryptoError::SignatureVerification)?;
            vk.verify(message, &sig)
                .map_err(|_| CryptoError::SignatureVerification)
        }
        SignatureAlgorithm::MlDsa65 => {
            let pk = mldsa65::PublicKey::from_bytes(public)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let sig = mldsa65::DetachedSignature::from_bytes(signature)
                .map_err(|_| CryptoError::SignatureVerification)?;
            mldsa65::verify_detached_signature(&sig, message, &pk)
                .map_err(|_| CryptoError::SignatureVerification)
        }
    }
}

/// 64-byte SHA-512 digest of a wire-serialised public key.
/// This is the trust store's primary key for peer records.
pub fn public_key_hash(public: &[u8]) -> [u8; 64] {
    let digest = Sha512::digest(public);
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

/// Human-readable fingerprint for out-of-band verification: the first
/// 20 bytes of the key hash, hex-encoded in groups of 4.
///
/// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789 0abc def0"
pub fn fingerprint(public: &[u8]) -> String {
    let hash = public_key_hash(public);
    let hex = hex::encode(&hash[..20]);
    hex.as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).expect("hex output is ascii"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Variants ──────────────────────────────────────────────────────────────────

pub struct Ed25519Identity {
    signing: SigningKey,
}

impl Ed25519Identity {
    fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    fn from_pkcs8(private: &[u8]) -> Result<Self, CryptoError> {
        let signing = SigningKey::from_pkcs8_der(private)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { signing })
    }
}

pub struct MlDsa65Identity {
    public: mldsa65::PublicKey,
    secret: mldsa65::SecretKey,
}

impl MlDsa65Identity {
    fn generate() -> Self {
        let (public, secret) = mldsa65::keypair();
        Self { public, secret }
    }

    /// Canonical form is `secret || public`, both fixed-width.
    fn from_canonical(private: &[u8]) -> Result<Self, CryptoError> {
        let sk_len = mldsa65::secret_key_bytes();
        let pk_len = mldsa65::public_key_bytes();
        if private.len() != sk_len + pk_len {
            return Err(CryptoError::InvalidKey(format!(
                "ML-DSA-65 private form must be {} bytes, got {}",
                sk_len + pk_len,
                private.len()
            )));
        }
        let secret = mldsa65::SecretKey::from_bytes(&private[..sk_len])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = mldsa65::PublicKey::from_bytes(&private[sk_len..])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { public, secret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip_both_variants() {
        for algorithm in [SignatureAlgorithm::Ed25519, SignatureAlgorithm::MlDsa65] {
            let id = Identity::generate(algorithm);
            let public = id.public_key_bytes().unwrap();
            let sig = id.sign(b"introduce yourself");
            verify(algorithm, &public, b"introduce yourself", &sig).unwrap();
        }
    }

    #[test]
    fn flipped_message_bit_fails() {
        let id = Identity::generate(SignatureAlgorithm::Ed25519);
        let public = id.public_key_bytes().unwrap();
        let sig = id.sign(b"original");
        let mut tampered = b"original".to_vec();
        tampered[0] ^= 0x01;
        assert!(verify(SignatureAlgorithm::Ed25519, &public, &tampered, &sig).is_err());
    }

    #[test]
    fn flipped_signature_bit_fails() {
        let id = Identity::generate(SignatureAlgorithm::MlDsa65);
        let public = id.public_key_bytes().unwrap();
        let mut sig = id.sign(b"message");
        sig[0] ^= 0x80;
        assert!(verify(SignatureAlgorithm::MlDsa65, &public, b"message", &sig).is_err());
    }

    #[test]
    fn private_serialisation_roundtrip() {
        for algorithm in [SignatureAlgorithm::Ed25519, SignatureAlgorithm::MlDsa65] {
            let id = Identity::generate(algorithm);
            let private = id.serialize_private().unwrap();
            let restored = Identity::restore(algorithm, &private).unwrap();
            assert_eq!(
                restored.public_key_bytes().unwrap(),
                id.public_key_bytes().unwrap()
            );
            // The restored key must produce verifiable signatures.
            let sig = restored.sign(b"after restore");
            let public = id.public_key_bytes().unwrap();
            verify(algorithm, &public, b"after restore", &sig).unwrap();
        }
    }

    #[test]
    fn algorithm_names_roundtrip() {
        for algorithm in [SignatureAlgorithm::Ed25519, SignatureAlgorithm::MlDsa65] {
            assert_eq!(
                SignatureAlgorithm::parse(algorithm.as_str()).unwrap(),
                algorithm
            );
        }
        assert!(SignatureAlgorithm::parse("rsa4096").is_err());
    }

    #[test]
    fn key_hash_is_64_bytes_and_stable() {
        let id = Identity::generate(SignatureAlgorithm::Ed25519);
        let public = id.public_key_bytes().unwrap();
        let h1 = public_key_hash(&public);
        let h2 = public_key_hash(&public);
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, h2);
    }

    #[test]
    fn fingerprint_is_grouped_hex() {
        let id = Identity::generate(SignatureAlgorithm::Ed25519);
        let fp = fingerprint(&id.public_key_bytes().unwrap());
        let groups: Vec<&str> = fp.split(' ').collect();
        assert_eq!(groups.len(), 10);
        assert!(groups.iter().all(|g| g.len() == 4));
    }
}
