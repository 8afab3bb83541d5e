//! The signed transport record wrapping every message.
//!
//! Whatever phase a session is in, the unit that travels (plain during the
//! introduction, AEAD- or ratchet-encrypted afterwards) is one `Envelope`:
//!
//!   - `data`      — opaque inner payload
//!   - `signature` — over `data`, made with the sender's long-term identity
//!   - `metadata`  — random id, timestamp, advisory sequence number
//!   - `padding`   — up to `max_padding` random bytes against size analysis
//!   - `route`     — message-type tag
//!
//! The sequence number is advisory metadata: counters on both ends are
//! monotone, but the receiver does not reject on a mismatch alone.

use prost::Message;
use rand::{rngs::OsRng, Rng, RngCore};

use veil_crypto::identity::{self, Identity, SignatureAlgorithm};

use crate::{route::Route, ProtoError};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metadata {
    /// Random message id (no cryptographic meaning; ack/debug only).
    #[prost(string, tag = "1")]
    pub id: String,
    /// Sender's clock, milliseconds since the Unix epoch.
    #[prost(uint64, tag = "2")]
    pub timestamp: u64,
    /// Position in the sender's outgoing counter at send time.
    #[prost(uint64, tag = "3")]
    pub sequence: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub metadata: Option<Metadata>,
    #[prost(bytes = "vec", tag = "4")]
    pub padding: Vec<u8>,
    #[prost(enumeration = "Route", tag = "5")]
    pub route: i32,
}

impl Envelope {
    /// Build and sign an envelope for `data` under `route`.
    pub fn seal(
        identity: &Identity,
        route: Route,
        data: Vec<u8>,
        sequence: u64,
        max_padding: usize,
    ) -> Self {
        let signature = identity.sign(&data);
        let pad_len = if max_padding > 0 {
            OsRng.gen_range(0..=max_padding)
        } else {
            0
        };
        let mut padding = vec![0u8; pad_len];
        OsRng.fill_bytes(&mut padding);

        Self {
            data,
            signature,
            metadata: Some(Metadata {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: chrono::Utc::now().timestamp_millis() as u64,
                sequence,
            }),
            padding,
            route: route as i32,
        }
    }

    /// Check the signature over `data` against a wire-serialised public key.
    pub fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        public: &[u8],
    ) -> Result<(), ProtoError> {
        identity::verify(algorithm, public, &self.data, &self.signature)
            .map_err(|_| ProtoError::InvalidSignature)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self::decode(bytes)?)
    }
}
