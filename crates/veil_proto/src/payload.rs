//! Inner payloads carried in envelope `data`.

use prost::Message;

use crate::ProtoError;

/// Introduction payload (route `Identity`): the sender announces its display
/// name and long-term public key. The envelope carrying this payload is
/// signed by the announced key itself, which proves possession.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerIntroduction {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    /// Signature algorithm by name: "ed25519" or "mldsa65".
    #[prost(string, tag = "3")]
    pub algorithm: String,
}

/// Handshake payload (routes `RequestHandshake` / `AcceptHandshake`).
///
/// On request, `key` is the initiator's ephemeral KEM public key and
/// `session_key` the session-id prefix; on accept, `key` is the KEM
/// ciphertext and `session_key` the suffix.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Handshake {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub salt: Vec<u8>,
    #[prost(string, tag = "3")]
    pub session_key: String,
}

/// Outer structure of one message once the ratchet is active.
///
/// `dh` is empty except on rotation, where it carries the sender's fresh
/// X25519 public key; the receiver must rotate its chains before decrypting
/// this very ciphertext. `pn` counts messages under the previous sending
/// chain, `ns` is the 0-based index under the current one.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RatchetEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub dh: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub pn: u64,
    #[prost(uint64, tag = "3")]
    pub ns: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub ciphertext: Vec<u8>,
}

macro_rules! wire_codec {
    ($ty:ty) => {
        impl $ty {
            pub fn to_bytes(&self) -> Vec<u8> {
                self.encode_to_vec()
            }

            pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
                Ok(<$ty>::decode(bytes)?)
            }
        }
    };
}

wire_codec!(PeerIntroduction);
wire_codec!(Handshake);
wire_codec!(RatchetEnvelope);
