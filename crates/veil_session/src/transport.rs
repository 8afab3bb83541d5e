//! The encrypted transport: signed envelopes over framed I/O, with the
//! encryption layer that matches the session's progress.
//!
//! Three wire shapes, by phase:
//! 1. Introduction and handshake routes travel as plain signed envelopes —
//!    there is no shared key yet; authenticity comes from the signature.
//! 2. Once the handshake ciphers exist, whole envelopes are AEAD-encrypted
//!    before framing (challenge exchange, ratchet bootstrap).
//! 3. Once the ratchet is live, each frame is a `RatchetEnvelope` whose
//!    ciphertext is the ratchet-encrypted envelope. When the sending chain
//!    has carried `ratchet_threshold` messages, the next send rotates the
//!    DH key and ships the fresh public key in the `dh` field; a receiver
//!    seeing a non-empty `dh` rotates its chains before decrypting.
//!
//! One mutex guards phase, counters, ciphers, and the ratchet. It is never
//! held across frame I/O: the send path grabs the writer lock before
//! releasing the state lock (so ciphertexts hit the wire in chain order),
//! and the receive path decrypts while still holding the reader lock.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use veil_crypto::{
    aead::SealedCipher,
    identity::{Identity, SignatureAlgorithm},
    ratchet::{DoubleRatchet, RatchetState},
};
use veil_proto::{Envelope, Metadata, RatchetEnvelope, Route};

use crate::{config::Config, error::SessionError, framing::FramedConn, phase::Phase};

pub struct SecureTransport<S> {
    conn: FramedConn<S>,
    identity: Arc<Identity>,
    max_padding: usize,
    ratchet_threshold: u64,
    state: Mutex<TransportState>,
}

struct TransportState {
    phase: Phase,
    session_id: String,
    encoder: Option<SealedCipher>,
    decoder: Option<SealedCipher>,
    ratchet: Option<DoubleRatchet>,
    send_seq: u64,
    recv_seq: u64,
    /// Messages encrypted under the current sending chain; drives rotation.
    chain_sends: u64,
    remote_public: Option<Vec<u8>>,
    remote_algorithm: Option<SignatureAlgorithm>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SecureTransport<S> {
    pub fn new(stream: S, identity: Arc<Identity>, config: &Config) -> Self {
        Self {
            conn: FramedConn::new(stream, config),
            identity,
            max_padding: config.max_padding,
            ratchet_threshold: config.ratchet_threshold,
            state: Mutex::new(TransportState {
                phase: Phase::Invalid,
                session_id: String::new(),
                encoder: None,
                decoder: None,
                ratchet: None,
                send_seq: 0,
                recv_seq: 0,
                chain_sends: 0,
                remote_public: None,
                remote_algorithm: None,
            }),
        }
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    // ── Sending ──────────────────────────────────────────────────────────

    /// Seal `data` under `route`, encrypt per the current phase, and write
    /// one frame. Returns the envelope metadata.
    pub async fn send(&self, data: &[u8], route: Route) -> Result<Metadata, SessionError> {
        if !route.routable() {
            return Err(SessionError::InvalidRoute(route));
        }

        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        if st.phase == Phase::Closed {
            return Err(SessionError::ConnClosed);
        }

        let envelope = Envelope::seal(
            &self.identity,
            route,
            data.to_vec(),
            st.send_seq,
            self.max_padding,
        );
        let metadata = envelope.metadata.clone().unwrap_or_default();
        let envelope_bytes = envelope.to_bytes();

        let session_id = st.session_id.clone();
        let frame = if let Some(ratchet) =
            st.ratchet.as_mut().filter(|r| r.has_send_chain())
        {
            let dh = if st.chain_sends >= self.ratchet_threshold {
                let fresh = ratchet.initiate_ratchet(&session_id)?;
                st.chain_sends = 0;
                tracing::debug!(session = %session_id, "rotated sending ratchet key");
                fresh.to_vec()
            } else {
                Vec::new()
            };
            let outer = RatchetEnvelope {
                dh,
                pn: ratchet.prev_send_count(),
                ns: ratchet.send_count(),
                ciphertext: ratchet.encrypt(&envelope_bytes)?,
            };
            st.chain_sends += 1;
            outer.to_bytes()
        } else if let Some(encoder) = &st.encoder {
            encoder.encrypt(&envelope_bytes)?
        } else {
            envelope_bytes
        };
        st.send_seq += 1;

        // Take the writer before releasing the state lock so concurrent
        // sends hit the wire in the order they advanced the chain.
        let mut writer = self.conn.writer().await?;
        drop(guard);
        writer.write_frame(&frame).await?;
        Ok(metadata)
    }

    // ── Receiving ────────────────────────────────────────────────────────

    /// Read one frame, decrypt per the current phase, and return the inner
    /// payload with its metadata and route.
    pub async fn receive(&self) -> Result<(Vec<u8>, Metadata, Route), SessionError> {
        let (envelope, route) = self.receive_envelope().await?;
        let metadata = envelope.metadata.clone().unwrap_or_default();
        Ok((envelope.data, metadata, route))
    }

    /// Like [`receive`](Self::receive), but fails unless the message
    /// arrived under `expected`.
    pub async fn receive_expecting(
        &self,
        expected: Route,
    ) -> Result<(Vec<u8>, Metadata), SessionError> {
        let (payload, metadata, route) = self.receive().await?;
        if route != expected {
            return Err(SessionError::UnexpectedRoute {
                expected,
                actual: route,
            });
        }
        Ok((payload, metadata))
    }

    /// Read and decrypt one envelope, verifying its signature when the
    /// remote key is already known. The introduction flow calls this
    /// directly to verify the self-signed envelope itself.
    pub(crate) async fn receive_envelope(&self) -> Result<(Envelope, Route), SessionError> {
        let mut reader = self.conn.reader().await?;
        let frame = reader.read_frame().await?;

        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        if st.phase == Phase::Closed {
            return Err(SessionError::ConnClosed);
        }

        let session_id = st.session_id.clone();
        let envelope_bytes: Vec<u8> = if let Some(ratchet) =
            st.ratchet.as_mut().filter(|r| r.has_send_chain())
        {
            let outer = RatchetEnvelope::from_bytes(&frame)?;
            if !outer.dh.is_empty() {
                let peer: [u8; 32] = outer.dh.as_slice().try_into().map_err(|_| {
                    veil_crypto::CryptoError::InvalidKey("ratchet key must be 32 bytes".into())
                })?;
                // Rotate into place before touching the ciphertext that
                // announced the new key.
                ratchet.set_their_public(&peer, &session_id)?;
                tracing::debug!(session = %session_id, "rotated receiving ratchet key");
            }
            ratchet.decrypt(&outer.ciphertext)?.to_vec()
        } else if let Some(decoder) = &st.decoder {
            decoder.decrypt(&frame)?.to_vec()
        } else {
            frame
        };

        let envelope = Envelope::from_bytes(&envelope_bytes)?;
        let route = envelope.route();
        if !route.routable() {
            return Err(SessionError::InvalidRoute(route));
        }
        if let (Some(public), Some(algorithm)) = (&st.remote_public, st.remote_algorithm) {
            envelope.verify(algorithm, public)?;
        }
        st.recv_seq += 1;
        Ok((envelope, route))
    }

    /// Mark the session closed and shut the connection down.
    pub async fn close(&self) -> Result<(), SessionError> {
        {
            let mut st = self.state.lock().await;
            st.phase = Phase::Closed;
        }
        self.conn.close().await
    }

    // ── State management (driven by the handshake) ───────────────────────

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Advance the phase, enforcing the forward-only ordering.
    pub async fn set_phase(&self, to: Phase) -> Result<(), SessionError> {
        let mut st = self.state.lock().await;
        if !st.phase.can_transition(to) {
            return Err(SessionError::InvalidPhaseTransition { from: st.phase, to });
        }
        tracing::debug!(from = ?st.phase, to = ?to, "phase transition");
        st.phase = to;
        Ok(())
    }

    pub async fn set_remote(&self, public: Vec<u8>, algorithm: SignatureAlgorithm) {
        let mut st = self.state.lock().await;
        st.remote_public = Some(public);
        st.remote_algorithm = Some(algorithm);
    }

    /// Install the session id and AEAD pair derived from the handshake.
    pub async fn install_ciphers(
        &self,
        session_id: String,
        encoder: SealedCipher,
        decoder: SealedCipher,
    ) {
        let mut st = self.state.lock().await;
        st.session_id = session_id;
        st.encoder = Some(encoder);
        st.decoder = Some(decoder);
    }

    /// Hand the bootstrapped ratchet over; from the next message on, all
    /// traffic is ratchet-encrypted.
    pub async fn install_ratchet(&self, ratchet: DoubleRatchet) {
        let mut st = self.state.lock().await;
        st.ratchet = Some(ratchet);
        st.chain_sends = 0;
    }

    pub async fn session_id(&self) -> String {
        self.state.lock().await.session_id.clone()
    }

    pub async fn sequences(&self) -> (u64, u64) {
        let st = self.state.lock().await;
        (st.send_seq, st.recv_seq)
    }

    /// Restore counters from a saved session.
    pub async fn set_sequences(&self, send_seq: u64, recv_seq: u64) {
        let mut st = self.state.lock().await;
        st.send_seq = send_seq;
        st.recv_seq = recv_seq;
    }

    /// Serialisable ratchet state, if the ratchet is live.
    pub async fn ratchet_state(&self) -> Option<RatchetState> {
        self.state.lock().await.ratchet.as_ref().map(|r| r.save())
    }
}
