//! Session configuration.
//!
//! One explicit record holds every knob; `Config::default()` is a working
//! setup for both ends of a channel. Deadlines of `None` disable the
//! corresponding timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use veil_crypto::identity::SignatureAlgorithm;

/// Absolute ceiling on a frame body, fixed by the 2-byte length prefix.
pub const HARD_TRANSPORT_CAP: usize = u16::MAX as usize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Soft cap on one frame body, bytes. Clamped to [`HARD_TRANSPORT_CAP`].
    pub max_transport_size: usize,
    /// Handshake salt length, bytes.
    pub salt_size: usize,
    /// Total session-id length; each side contributes half.
    pub session_id_length: usize,
    /// Challenge length, bytes.
    pub challenge_size: usize,
    /// Upper bound on random envelope padding, bytes.
    pub max_padding: usize,
    /// Messages per sending chain before a DH rotation is initiated.
    pub ratchet_threshold: u64,
    pub read_deadline: Option<Duration>,
    pub write_deadline: Option<Duration>,
    pub dial_deadline: Option<Duration>,
    /// Long-term identity scheme announced during introduction.
    pub signature_algorithm: SignatureAlgorithm,
    /// Trust-store records older than this are purged on read.
    pub peer_expiry: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_transport_size: 50 * 1024,
            salt_size: 16,
            session_id_length: 20,
            challenge_size: 32,
            max_padding: 256,
            ratchet_threshold: 10,
            read_deadline: Some(Duration::from_secs(30)),
            write_deadline: Some(Duration::from_secs(30)),
            dial_deadline: Some(Duration::from_secs(10)),
            signature_algorithm: SignatureAlgorithm::Ed25519,
            peer_expiry: Duration::from_secs(60 * 60 * 24 * 90),
        }
    }
}

impl Config {
    /// The frame-body limit actually enforced.
    pub fn frame_limit(&self) -> usize {
        self.max_transport_size.min(HARD_TRANSPORT_CAP)
    }
}
