//! A fully established secure channel.
//!
//! `Session::connect` / `Session::accept` run the whole establishment
//! protocol over any reliable byte stream and hand back a channel whose
//! payload traffic is ratchet-encrypted. Sessions can be saved to a
//! serialisable state and resumed over a fresh connection.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

use veil_crypto::{aead::SealedCipher, identity::Identity, ratchet::{DoubleRatchet, RatchetState}};
use veil_proto::{Metadata, Route};
use veil_store::{PeerRecord, TrustStore};

use crate::{
    config::Config,
    error::SessionError,
    handshake::{self, Established},
    phase::Phase,
    router::{recovery, HandlerRequest, Router},
    transport::SecureTransport,
    verifier::RemoteVerifier,
};

pub struct Session<S> {
    transport: Arc<SecureTransport<S>>,
    router: Arc<Router>,
    peer: PeerRecord,
    session_id: String,
    initiator: bool,
    shared_secret: Zeroizing<[u8; 32]>,
    local_salt: Vec<u8>,
    remote_salt: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Session<S> {
    /// Dial-side establishment over an already-connected stream.
    pub async fn connect(
        stream: S,
        identity: Arc<Identity>,
        local_name: &str,
        store: &TrustStore,
        verifier: &RemoteVerifier,
        config: &Config,
    ) -> Result<Self, SessionError> {
        let transport = SecureTransport::new(stream, identity, config);
        match handshake::establish_initiator(&transport, local_name, store, verifier, config).await
        {
            Ok(established) => Ok(Self::assemble(transport, established, true)),
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    }

    /// Accept-side establishment over an already-accepted stream.
    pub async fn accept(
        stream: S,
        identity: Arc<Identity>,
        local_name: &str,
        store: &TrustStore,
        verifier: &RemoteVerifier,
        config: &Config,
    ) -> Result<Self, SessionError> {
        let transport = SecureTransport::new(stream, identity, config);
        match handshake::establish_responder(&transport, local_name, store, verifier, config).await
        {
            Ok(established) => Ok(Self::assemble(transport, established, false)),
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    }

    fn assemble(
        transport: SecureTransport<S>,
        established: Established,
        initiator: bool,
    ) -> Self {
        let router = Router::new();
        // Handler panics must never take the receive loop down.
        router.add_middleware(recovery());
        Self {
            transport: Arc::new(transport),
            router: Arc::new(router),
            peer: established.peer,
            session_id: established.session_id,
            initiator,
            shared_secret: established.shared_secret,
            local_salt: established.local_salt,
            remote_salt: established.remote_salt,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn peer(&self) -> &PeerRecord {
        &self.peer
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn transport(&self) -> &Arc<SecureTransport<S>> {
        &self.transport
    }

    // ── Payload traffic ──────────────────────────────────────────────────

    /// Send application bytes to the peer.
    pub async fn send(&self, data: &[u8]) -> Result<Metadata, SessionError> {
        self.transport.send(data, Route::ExchangeMessages).await
    }

    /// Receive the next application message.
    pub async fn receive(&self) -> Result<(Vec<u8>, Metadata), SessionError> {
        self.transport
            .receive_expecting(Route::ExchangeMessages)
            .await
    }

    /// Receive loop: dispatch every incoming message through the router
    /// until the peer closes or a transport failure ends the session.
    pub async fn serve(&self) -> Result<(), SessionError> {
        loop {
            let (payload, metadata, route) = match self.transport.receive().await {
                Ok(received) => received,
                Err(SessionError::ConnClosed) => return Ok(()),
                Err(e) => {
                    let _ = self.transport.close().await;
                    return Err(e);
                }
            };

            if route == Route::CloseTransport {
                tracing::debug!(session = %self.session_id, "peer closed the transport");
                self.router.close();
                let _ = self.transport.close().await;
                return Ok(());
            }

            let request = HandlerRequest {
                route,
                payload,
                metadata,
                phase: self.transport.phase().await,
            };
            match self.router.dispatch(&request) {
                Ok(()) => {}
                Err(SessionError::RouterClosed) => return Err(SessionError::RouterClosed),
                Err(e) => {
                    tracing::warn!(session = %self.session_id, route = ?request.route, error = %e, "handler error");
                }
            }
        }
    }

    /// Tell the peer we are done and close the connection.
    pub async fn close(&self) -> Result<(), SessionError> {
        let _ = self.transport.send(&[], Route::CloseTransport).await;
        self.router.close();
        self.transport.close().await
    }

    // ── Persistence ──────────────────────────────────────────────────────

    /// Snapshot the resumable context.
    pub async fn save(&self) -> Result<SessionState, SessionError> {
        let (send_seq, recv_seq) = self.transport.sequences().await;
        Ok(SessionState {
            session_id: self.session_id.clone(),
            shared_secret: URL_SAFE_NO_PAD.encode(self.shared_secret.as_ref()),
            local_salt: URL_SAFE_NO_PAD.encode(&self.local_salt),
            remote_salt: URL_SAFE_NO_PAD.encode(&self.remote_salt),
            send_seq,
            recv_seq,
            initiator: self.initiator,
            peer: self.peer.clone(),
            ratchet: self.transport.ratchet_state().await.unwrap_or_default(),
            saved_at: Utc::now(),
        })
    }

    /// Resume a saved session over a fresh stream, dial side.
    pub async fn resume_initiator(
        stream: S,
        identity: Arc<Identity>,
        state: SessionState,
        config: &Config,
    ) -> Result<Self, SessionError> {
        Self::resume(stream, identity, state, config, true).await
    }

    /// Resume a saved session over a fresh stream, accept side.
    pub async fn resume_responder(
        stream: S,
        identity: Arc<Identity>,
        state: SessionState,
        config: &Config,
    ) -> Result<Self, SessionError> {
        Self::resume(stream, identity, state, config, false).await
    }

    async fn resume(
        stream: S,
        identity: Arc<Identity>,
        state: SessionState,
        config: &Config,
        initiator: bool,
    ) -> Result<Self, SessionError> {
        if state.ratchet.is_empty() {
            return Err(SessionError::ResumptionFailed(
                "serialized ratchet state is empty".into(),
            ));
        }
        if let Ok(age) = (Utc::now() - state.saved_at).to_std() {
            if age > config.peer_expiry {
                return Err(SessionError::SessionExpired);
            }
        }

        let shared_secret = decode_32(&state.shared_secret, "shared secret")?;
        let local_salt = URL_SAFE_NO_PAD.decode(&state.local_salt).map_err(bad_state)?;
        let remote_salt = URL_SAFE_NO_PAD
            .decode(&state.remote_salt)
            .map_err(bad_state)?;

        let transport = SecureTransport::new(stream, identity, config);
        transport
            .set_remote(state.peer.public_key.clone(), state.peer.algorithm)
            .await;

        // Directions are role-relative, exactly as they were derived during
        // the original handshake.
        let (send_dir, recv_dir): (&[u8], &[u8]) = if initiator {
            (b"client-to-server", b"server-to-client")
        } else {
            (b"server-to-client", b"client-to-server")
        };
        let encoder = SealedCipher::new(
            shared_secret.as_ref(),
            &local_salt,
            &[state.session_id.as_bytes(), send_dir].concat(),
        )?;
        let decoder = SealedCipher::new(
            shared_secret.as_ref(),
            &remote_salt,
            &[state.session_id.as_bytes(), recv_dir].concat(),
        )?;
        transport
            .install_ciphers(state.session_id.clone(), encoder, decoder)
            .await;
        transport.set_phase(Phase::Established).await?;

        // Mutual session-id check over the restored ciphers before the
        // ratchet resumes.
        if initiator {
            transport
                .send(state.session_id.as_bytes(), Route::Reconnect)
                .await?;
            let (echo, _) = transport.receive_expecting(Route::Reconnect).await?;
            if echo != state.session_id.as_bytes() {
                return Err(SessionError::SessionNotFound);
            }
        } else {
            let (claimed, _) = transport.receive_expecting(Route::Reconnect).await?;
            if claimed != state.session_id.as_bytes() {
                return Err(SessionError::SessionNotFound);
            }
            transport
                .send(state.session_id.as_bytes(), Route::Reconnect)
                .await?;
        }

        let ratchet = DoubleRatchet::restore(&state.ratchet)
            .map_err(|e| SessionError::ResumptionFailed(e.to_string()))?;
        transport.install_ratchet(ratchet).await;
        transport.set_sequences(state.send_seq, state.recv_seq).await;

        tracing::info!(session = %state.session_id, "session resumed");
        let established = Established {
            peer: state.peer,
            session_id: state.session_id,
            shared_secret,
            local_salt,
            remote_salt,
        };
        Ok(Self::assemble(transport, established, initiator))
    }
}

fn decode_32(encoded: &str, what: &str) -> Result<Zeroizing<[u8; 32]>, SessionError> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(bad_state)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SessionError::ResumptionFailed(format!("{what} must be 32 bytes")))?;
    Ok(Zeroizing::new(arr))
}

fn bad_state(e: base64::DecodeError) -> SessionError {
    SessionError::ResumptionFailed(e.to_string())
}

/// The complete resumable context of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// base64url-encoded 32-byte KEM shared secret.
    pub shared_secret: String,
    pub local_salt: String,
    pub remote_salt: String,
    pub send_seq: u64,
    pub recv_seq: u64,
    pub initiator: bool,
    pub peer: PeerRecord,
    pub ratchet: RatchetState,
    pub saved_at: DateTime<Utc>,
}
