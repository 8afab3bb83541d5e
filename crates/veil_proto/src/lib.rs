//! veil_proto — Wire types, envelopes, and serialisation for Veil Secure Channel
//!
//! Everything that crosses the wire is protobuf-encoded with fixed field
//! tags; the tags are part of the protocol and must not be renumbered.
//!
//! # Modules
//! - `route`    — message-type tags and their handshake/session classification
//! - `envelope` — the signed transport record wrapping every message
//! - `payload`  — inner payloads: introduction, handshake, ratchet envelope

pub mod envelope;
pub mod payload;
pub mod route;

pub use envelope::{Envelope, Metadata};
pub use payload::{Handshake, PeerIntroduction, RatchetEnvelope};
pub use route::Route;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Wire decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Envelope signature does not verify")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Crypto(#[from] veil_crypto::CryptoError),
}
