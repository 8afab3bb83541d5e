//! Peer records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veil_crypto::identity::{public_key_hash, SignatureAlgorithm};

/// A remote party's enduring identifier, as remembered across sessions.
///
/// Records are keyed in the store by the 64-byte hash of `public_key`, so a
/// peer that rotates its key produces a *new* record — the old one stays
/// until it expires, which is what lets the verifier notice the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub name: String,
    pub algorithm: SignatureAlgorithm,
    #[serde(with = "b64_bytes")]
    pub public_key: Vec<u8>,
    pub first_seen: DateTime<Utc>,
}

impl PeerRecord {
    pub fn new(name: String, algorithm: SignatureAlgorithm, public_key: Vec<u8>) -> Self {
        Self {
            name,
            algorithm,
            public_key,
            first_seen: Utc::now(),
        }
    }

    /// The store key: SHA-512 of the public key.
    pub fn key_hash(&self) -> [u8; 64] {
        public_key_hash(&self.public_key)
    }

    /// Hex form of [`key_hash`](Self::key_hash), used as the map key.
    pub fn key_hash_hex(&self) -> String {
        hex::encode(self.key_hash())
    }
}

mod b64_bytes {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD.decode(&s).map_err(serde::de::Error::custom)
    }
}
