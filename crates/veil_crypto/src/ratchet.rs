//! Continuous key update for an established session.
//!
//! References:
//!   - Signal Double Ratchet spec: <https://signal.org/docs/specifications/doubleratchet/>
//!
//! State separation (non-negotiable):
//!   RK  — root key (updated on every DH step)
//!   CKs — sending chain key (updated per message)
//!   CKr — receiving chain key (updated per message)
//!   MK  — message key (derived from CK, used once, then DELETED)
//!
//! A DH step mixes a fresh X25519 output into the root key, replacing both
//! chain keys at once. Steps are explicit: the sender calls
//! [`DoubleRatchet::initiate_ratchet`] when its transport decides to rotate
//! and ships the new public key alongside the ciphertext; the receiver calls
//! [`DoubleRatchet::set_their_public`] before decrypting that ciphertext.
//!
//! Which side owns which chain after a step is decided without any role
//! signal: the side whose current public key is lexicographically smaller
//! takes the first derived chain for sending. The two sides therefore always
//! land on mirrored assignments.
//!
//! The transport beneath this state machine delivers ciphertexts in order,
//! so there is no skipped-message key cache; a lost or reordered frame is a
//! broken session, not a recoverable condition.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    aead::SealedCipher,
    dh::DhKeyPair,
    error::CryptoError,
    kdf::{chain_kdf, root_kdf},
};

/// Info label for per-message cipher derivation.
const MSG_INFO: &[u8] = b"DR:msg";

/// Per-session continuous-rekey state.
pub struct DoubleRatchet {
    root_key: Zeroizing<[u8; 32]>,
    send_chain: Option<Zeroizing<[u8; 32]>>,
    recv_chain: Option<Zeroizing<[u8; 32]>>,
    keypair: DhKeyPair,
    their_public: Option<[u8; 32]>,
    send_count: u64,
    recv_count: u64,
    prev_send_count: u64,
}

impl DoubleRatchet {
    /// Initialise from the 32-byte handshake secret.
    ///
    /// Chain keys stay absent until the first DH step installs them; the
    /// owned keypair's public half is what the peer needs for that step.
    pub fn new_from_secret(root_secret: &[u8; 32]) -> Self {
        Self {
            root_key: Zeroizing::new(*root_secret),
            send_chain: None,
            recv_chain: None,
            keypair: DhKeyPair::generate(),
            their_public: None,
            send_count: 0,
            recv_count: 0,
            prev_send_count: 0,
        }
    }

    /// Our current DH public key (sent during ratchet bootstrap).
    pub fn public_bytes(&self) -> [u8; 32] {
        self.keypair.public_bytes()
    }

    /// Install the peer's latest DH public key and advance the root chain.
    ///
    /// Called once during bootstrap and again whenever an incoming message
    /// carries a fresh key — always before decrypting the ciphertext that
    /// introduced it, so rotation is atomic with that message.
    pub fn set_their_public(
        &mut self,
        peer_public: &[u8; 32],
        session_id: &str,
    ) -> Result<(), CryptoError> {
        let dh_shared = self.keypair.exchange(peer_public);
        self.advance_root(&dh_shared, peer_public, session_id)?;
        self.their_public = Some(*peer_public);
        Ok(())
    }

    /// Rotate our own keypair and advance the root chain with the peer's
    /// current key. Returns the new public key, which must travel with the
    /// next ciphertext so the peer can mirror the step.
    pub fn initiate_ratchet(&mut self, session_id: &str) -> Result<[u8; 32], CryptoError> {
        let peer_public = self.their_public.ok_or_else(|| {
            CryptoError::RatchetStep("cannot rotate before the peer's key is known".into())
        })?;
        let fresh = DhKeyPair::generate();
        let dh_shared = fresh.exchange(&peer_public);
        self.keypair = fresh;
        self.advance_root(&dh_shared, &peer_public, session_id)?;
        Ok(self.keypair.public_bytes())
    }

    /// One root-chain step: derive new root + chain pair and split the pair
    /// by the lexicographic ordering of the two public keys.
    fn advance_root(
        &mut self,
        dh_shared: &[u8; 32],
        peer_public: &[u8; 32],
        session_id: &str,
    ) -> Result<(), CryptoError> {
        let (new_root, chain_a, chain_b) = root_kdf(&self.root_key, dh_shared, session_id)?;
        let own_public = self.keypair.public_bytes();
        let initiator = own_public.as_slice() < peer_public.as_slice();

        *self.root_key = new_root;
        let (send, recv) = if initiator {
            (chain_a, chain_b)
        } else {
            (chain_b, chain_a)
        };
        self.send_chain = Some(Zeroizing::new(send));
        self.recv_chain = Some(Zeroizing::new(recv));
        self.prev_send_count = self.send_count;
        self.send_count = 0;
        self.recv_count = 0;
        Ok(())
    }

    /// Encrypt one message under the next sending key.
    ///
    /// The chain key is replaced by its successor before the message key is
    /// used; the used key never outlives this call.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let chain = self.send_chain.as_mut().ok_or_else(|| {
            CryptoError::RatchetStep("sending chain not initialised".into())
        })?;
        let (next, mut mk) = chain_kdf(chain)?;
        **chain = next;
        let cipher = SealedCipher::new(&mk, &[], MSG_INFO)?;
        mk.zeroize();
        let ciphertext = cipher.encrypt(plaintext)?;
        self.send_count += 1;
        Ok(ciphertext)
    }

    /// Decrypt one message with the next receiving key. Requires in-order
    /// delivery; a ciphertext that doesn't match the next key is a dead
    /// session.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let chain = self.recv_chain.as_mut().ok_or_else(|| {
            CryptoError::RatchetStep("receiving chain not initialised".into())
        })?;
        let (next, mut mk) = chain_kdf(chain)?;
        let cipher = SealedCipher::new(&mk, &[], MSG_INFO)?;
        mk.zeroize();
        let plaintext = cipher.decrypt(ciphertext)?;
        **chain = next;
        self.recv_count += 1;
        Ok(plaintext)
    }

    /// Messages encrypted under the current sending chain.
    pub fn send_count(&self) -> u64 {
        self.send_count
    }

    /// Messages decrypted under the current receiving chain.
    pub fn recv_count(&self) -> u64 {
        self.recv_count
    }

    /// Length of the previous sending chain (carried as `pn` on the wire).
    pub fn prev_send_count(&self) -> u64 {
        self.prev_send_count
    }

    pub fn has_send_chain(&self) -> bool {
        self.send_chain.is_some()
    }

    // ── Persistence ──────────────────────────────────────────────────────

    /// Deep-copy the state into its serialisable external form.
    pub fn save(&self) -> RatchetState {
        RatchetState {
            root_key: URL_SAFE_NO_PAD.encode(self.root_key.as_ref()),
            send_chain: self
                .send_chain
                .as_ref()
                .map(|c| URL_SAFE_NO_PAD.encode(c.as_ref())),
            recv_chain: self
                .recv_chain
                .as_ref()
                .map(|c| URL_SAFE_NO_PAD.encode(c.as_ref())),
            private_key: URL_SAFE_NO_PAD.encode(self.keypair.private_bytes().as_ref()),
            public_key: URL_SAFE_NO_PAD.encode(self.keypair.public_bytes()),
            their_public: self.their_public.map(|k| URL_SAFE_NO_PAD.encode(k)),
            send_count: self.send_count,
            recv_count: self.recv_count,
            prev_send_count: self.prev_send_count,
        }
    }

    /// Rebuild a ratchet from a previously saved state.
    pub fn restore(state: &RatchetState) -> Result<Self, CryptoError> {
        let root_key = decode_key(&state.root_key, "root key")?;
        let private = decode_key(&state.private_key, "private key")?;
        let public = decode_key(&state.public_key, "public key")?;
        let send_chain = state
            .send_chain
            .as_deref()
            .map(|c| decode_key(c, "send chain"))
            .transpose()?;
        let recv_chain = state
            .recv_chain
            .as_deref()
            .map(|c| decode_key(c, "recv chain"))
            .transpose()?;
        let their_public = state
            .their_public
            .as_deref()
            .map(|k| decode_key(k, "peer public"))
            .transpose()?;

        Ok(Self {
            root_key: Zeroizing::new(root_key),
            send_chain: send_chain.map(Zeroizing::new),
            recv_chain: recv_chain.map(Zeroizing::new),
            keypair: DhKeyPair::restore(&private, &public)?,
            their_public,
            send_count: state.send_count,
            recv_count: state.recv_count,
            prev_send_count: state.prev_send_count,
        })
    }
}

fn decode_key(encoded: &str, what: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("{what} must be 32 bytes")))
}

/// External serialised form. Key material is base64url.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatchetState {
    pub root_key: String,
    pub send_chain: Option<String>,
    pub recv_chain: Option<String>,
    pub private_key: String,
    pub public_key: String,
    pub their_public: Option<String>,
    pub send_count: u64,
    pub recv_count: u64,
    pub prev_send_count: u64,
}

impl RatchetState {
    /// True when the state carries no key material (never bootstrapped, or
    /// deserialised from an empty blob).
    pub fn is_empty(&self) -> bool {
        self.root_key.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Empty input is a valid (empty) state; anything else must parse.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bootstrap a connected pair the way a session does: both sides start
    /// from the same secret and install each other's public key.
    fn pair(session_id: &str) -> (DoubleRatchet, DoubleRatchet) {
        let secret = [42u8; 32];
        let mut a = DoubleRatchet::new_from_secret(&secret);
        let mut b = DoubleRatchet::new_from_secret(&secret);
        let a_pub = a.public_bytes();
        let b_pub = b.public_bytes();
        a.set_their_public(&b_pub, session_id).unwrap();
        b.set_their_public(&a_pub, session_id).unwrap();
        (a, b)
    }

    #[test]
    fn chains_are_mirrored_after_bootstrap() {
        let (mut a, mut b) = pair("sess-mirror");
        let ct = a.encrypt(b"from a").unwrap();
        assert_eq!(b.decrypt(&ct).unwrap().as_slice(), b"from a");
        let ct = b.encrypt(b"from b").unwrap();
        assert_eq!(a.decrypt(&ct).unwrap().as_slice(), b"from b");
    }

    #[test]
    fn counters_track_chain_positions() {
        let (mut a, mut b) = pair("sess-count");
        for i in 0..5u64 {
            assert_eq!(a.send_count(), i);
            let ct = a.encrypt(b"tick").unwrap();
            b.decrypt(&ct).unwrap();
        }
        assert_eq!(a.send_count(), 5);
        assert_eq!(b.recv_count(), 5);
    }

    #[test]
    fn rotation_keeps_both_sides_in_step() {
        let (mut a, mut b) = pair("sess-rotate");
        for _ in 0..3 {
            let ct = a.encrypt(b"before").unwrap();
            b.decrypt(&ct).unwrap();
        }

        // A rotates; B mirrors the step before decrypting.
        let new_pub = a.initiate_ratchet("sess-rotate").unwrap();
        assert_eq!(a.prev_send_count(), 3);
        let ct = a.encrypt(b"after rotation").unwrap();
        b.set_their_public(&new_pub, "sess-rotate").unwrap();
        assert_eq!(b.decrypt(&ct).unwrap().as_slice(), b"after rotation");

        // Traffic keeps flowing in both directions on the new chains.
        let ct = b.encrypt(b"reply").unwrap();
        assert_eq!(a.decrypt(&ct).unwrap().as_slice(), b"reply");
    }

    #[test]
    fn encrypt_without_chain_fails() {
        let mut lone = DoubleRatchet::new_from_secret(&[1u8; 32]);
        assert!(lone.encrypt(b"too early").is_err());
        assert!(lone.decrypt(b"too early").is_err());
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let (mut a, mut b) = pair("sess-tamper");
        let mut ct = a.encrypt(b"payload").unwrap();
        let mid = ct.len() / 2;
        ct[mid] ^= 0xff;
        assert!(b.decrypt(&ct).is_err());
    }

    #[test]
    fn save_restore_continues_cleanly() {
        let (mut a, mut b) = pair("sess-save");
        for _ in 0..3 {
            let ct = a.encrypt(b"persisted").unwrap();
            b.decrypt(&ct).unwrap();
        }

        let a_bytes = a.save().to_bytes().unwrap();
        let b_bytes = b.save().to_bytes().unwrap();
        let mut a2 = DoubleRatchet::restore(&RatchetState::from_bytes(&a_bytes).unwrap()).unwrap();
        let mut b2 = DoubleRatchet::restore(&RatchetState::from_bytes(&b_bytes).unwrap()).unwrap();

        assert_eq!(a2.send_count(), 3);
        assert_eq!(b2.recv_count(), 3);
        let ct = a2.encrypt(b"after resume").unwrap();
        assert_eq!(b2.decrypt(&ct).unwrap().as_slice(), b"after resume");
        let ct = b2.encrypt(b"back at you").unwrap();
        assert_eq!(a2.decrypt(&ct).unwrap().as_slice(), b"back at you");
    }

    #[test]
    fn empty_state_from_empty_bytes() {
        let state = RatchetState::from_bytes(&[]).unwrap();
        assert!(state.is_empty());
        assert!(DoubleRatchet::restore(&state).is_err());
    }
}
