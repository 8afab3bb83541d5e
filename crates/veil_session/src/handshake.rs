//! Session establishment.
//!
//! Four stages between an initiator (dialing side) and a responder:
//!
//! 1. **Introduction** — both sides exchange self-signed `Identity`
//!    envelopes; the signature is checked against the key the envelope
//!    itself announces, which proves possession. The injected verifier then
//!    decides whether to trust the peer (TOFU by default).
//! 2. **Handshake** — the initiator sends an ephemeral ML-KEM-768 public
//!    key, a salt, and the session-id prefix; the responder encapsulates,
//!    returning the ciphertext, its own salt, and the suffix. Both derive a
//!    directional AEAD pair bound to `session_id || direction`.
//! 3. **Challenge** — each side proves it derived the same secret: a
//!    KDF-derived value goes out encrypted, comes back verbatim, and is
//!    compared in constant time. Both directions must verify.
//! 4. **Ratchet bootstrap** — X25519 publics are exchanged and the double
//!    ratchet takes over all payload traffic.

use rand::{rngs::OsRng, Rng};
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

use veil_crypto::{
    aead::SealedCipher, identity::SignatureAlgorithm, kdf, kem, ratchet::DoubleRatchet,
};
use veil_proto::{Handshake, PeerIntroduction, ProtoError, Route};
use veil_store::{PeerRecord, TrustStore};

use crate::{
    config::Config, error::SessionError, phase::Phase, transport::SecureTransport,
    verifier::RemoteVerifier,
};

/// Base-32 alphabet for session-id halves.
const SESSION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Direction labels bound into cipher and challenge derivations.
const CLIENT_TO_SERVER: &[u8] = b"client-to-server";
const SERVER_TO_CLIENT: &[u8] = b"server-to-client";

/// Everything the session layer needs to remember about a completed
/// establishment.
pub(crate) struct Established {
    pub peer: PeerRecord,
    pub session_id: String,
    pub shared_secret: Zeroizing<[u8; 32]>,
    pub local_salt: Vec<u8>,
    pub remote_salt: Vec<u8>,
}

pub(crate) async fn establish_initiator<S>(
    transport: &SecureTransport<S>,
    local_name: &str,
    store: &TrustStore,
    verifier: &RemoteVerifier,
    config: &Config,
) -> Result<Established, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // ── Stage 1: introduction (initiator speaks first) ───────────────────
    transport.set_phase(Phase::Introduction).await?;
    send_introduction(transport, local_name).await?;
    let peer = receive_introduction(transport).await?;
    verifier(store, &peer)?;
    transport
        .set_remote(peer.public_key.clone(), peer.algorithm)
        .await;
    transport.set_phase(Phase::HandshakeRequested).await?;

    // ── Stage 2: handshake ───────────────────────────────────────────────
    let kem_pair = kem::KemKeyPair::generate();
    let local_salt = random_salt(config.salt_size);
    let prefix = random_session_half(config.session_id_length / 2);

    let offer = Handshake {
        key: kem_pair.public_bytes(),
        salt: local_salt.clone(),
        session_key: prefix.clone(),
    };
    transport
        .send(&offer.to_bytes(), Route::RequestHandshake)
        .await?;

    let (payload, _) = transport.receive_expecting(Route::AcceptHandshake).await?;
    let accept = Handshake::from_bytes(&payload)?;
    check_handshake_fields(&accept, config)?;

    let shared_secret = kem_pair.decapsulate(&accept.key)?;
    let remote_salt = accept.salt;
    let session_id = format!("{prefix}{}", accept.session_key);
    transport.set_phase(Phase::HandshakeAccepted).await?;

    let encoder = SealedCipher::new(
        shared_secret.as_ref(),
        &local_salt,
        &direction_info(&session_id, CLIENT_TO_SERVER),
    )?;
    let decoder = SealedCipher::new(
        shared_secret.as_ref(),
        &remote_salt,
        &direction_info(&session_id, SERVER_TO_CLIENT),
    )?;
    transport
        .install_ciphers(session_id.clone(), encoder, decoder)
        .await;

    // First encrypted message: proves to the responder that both sides
    // derived the same ciphers before any challenge flows.
    transport.send(&[], Route::FinalizeHandshake).await?;

    // ── Stage 3: challenges, both directions ─────────────────────────────
    let challenge = derive_challenge(&shared_secret, &session_id, CLIENT_TO_SERVER, config)?;
    transport.send(&challenge, Route::SendChallenge).await?;
    transport.set_phase(Phase::ChallengeSent).await?;

    let (echo, _) = transport.receive_expecting(Route::VerifyChallenge).await?;
    if !constant_time_eq(&echo, &challenge) {
        return Err(SessionError::VerificationFailed(
            "challenge echo mismatch".into(),
        ));
    }

    let (their_challenge, _) = transport.receive_expecting(Route::SendChallenge).await?;
    transport
        .send(&their_challenge, Route::VerifyChallenge)
        .await?;
    transport.set_phase(Phase::ChallengeVerified).await?;

    // ── Stage 4: ratchet bootstrap ───────────────────────────────────────
    let mut ratchet = DoubleRatchet::new_from_secret(&shared_secret);
    transport
        .send(&ratchet.public_bytes(), Route::InitializeDoubleRatchet)
        .await?;
    let (peer_public, _) = transport
        .receive_expecting(Route::ConfirmDoubleRatchet)
        .await?;
    ratchet.set_their_public(&as_dh_key(&peer_public)?, &session_id)?;
    transport.set_phase(Phase::RatchetInitialized).await?;
    transport.install_ratchet(ratchet).await;
    transport.set_phase(Phase::Established).await?;

    tracing::info!(session = %session_id, peer = %peer.name, "session established (initiator)");
    Ok(Established {
        peer,
        session_id,
        shared_secret,
        local_salt,
        remote_salt,
    })
}

pub(crate) async fn establish_responder<S>(
    transport: &SecureTransport<S>,
    local_name: &str,
    store: &TrustStore,
    verifier: &RemoteVerifier,
    config: &Config,
) -> Result<Established, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // ── Stage 1: introduction (responder reads first) ────────────────────
    transport.set_phase(Phase::Introduction).await?;
    let peer = receive_introduction(transport).await?;
    verifier(store, &peer)?;
    send_introduction(transport, local_name).await?;
    transport
        .set_remote(peer.public_key.clone(), peer.algorithm)
        .await;
    transport.set_phase(Phase::HandshakeRequested).await?;

    // ── Stage 2: handshake ───────────────────────────────────────────────
    let (payload, _) = transport
        .receive_expecting(Route::RequestHandshake)
        .await?;
    let request = Handshake::from_bytes(&payload)?;
    check_handshake_fields(&request, config)?;

    let (shared_secret, kem_ciphertext) = kem::encapsulate(&request.key)?;
    let remote_salt = request.salt;
    let local_salt = random_salt(config.salt_size);
    let suffix = random_session_half(config.session_id_length / 2);
    let session_id = format!("{}{suffix}", request.session_key);

    let accept = Handshake {
        key: kem_ciphertext,
        salt: local_salt.clone(),
        session_key: suffix,
    };
    transport
        .send(&accept.to_bytes(), Route::AcceptHandshake)
        .await?;
    transport.set_phase(Phase::HandshakeAccepted).await?;

    let encoder = SealedCipher::new(
        shared_secret.as_ref(),
        &local_salt,
        &direction_info(&session_id, SERVER_TO_CLIENT),
    )?;
    let decoder = SealedCipher::new(
        shared_secret.as_ref(),
        &remote_salt,
        &direction_info(&session_id, CLIENT_TO_SERVER),
    )?;
    transport
        .install_ciphers(session_id.clone(), encoder, decoder)
        .await;

    // Decrypting this successfully is the proof of cipher agreement.
    transport
        .receive_expecting(Route::FinalizeHandshake)
        .await?;

    // ── Stage 3: challenges, both directions ─────────────────────────────
    let (challenge, _) = transport.receive_expecting(Route::SendChallenge).await?;
    transport.send(&challenge, Route::VerifyChallenge).await?;
    transport.set_phase(Phase::ChallengeSent).await?;

    let own_challenge = derive_challenge(&shared_secret, &session_id, SERVER_TO_CLIENT, config)?;
    transport.send(&own_challenge, Route::SendChallenge).await?;
    let (echo, _) = transport.receive_expecting(Route::VerifyChallenge).await?;
    if !constant_time_eq(&echo, &own_challenge) {
        return Err(SessionError::VerificationFailed(
            "challenge echo mismatch".into(),
        ));
    }
    transport.set_phase(Phase::ChallengeVerified).await?;

    // ── Stage 4: ratchet bootstrap ───────────────────────────────────────
    let (peer_public, _) = transport
        .receive_expecting(Route::InitializeDoubleRatchet)
        .await?;
    let mut ratchet = DoubleRatchet::new_from_secret(&shared_secret);
    ratchet.set_their_public(&as_dh_key(&peer_public)?, &session_id)?;
    transport
        .send(&ratchet.public_bytes(), Route::ConfirmDoubleRatchet)
        .await?;
    transport.set_phase(Phase::RatchetInitialized).await?;
    transport.install_ratchet(ratchet).await;
    transport.set_phase(Phase::Established).await?;

    tracing::info!(session = %session_id, peer = %peer.name, "session established (responder)");
    Ok(Established {
        peer,
        session_id,
        shared_secret,
        local_salt,
        remote_salt,
    })
}

// ── Introduction helpers ──────────────────────────────────────────────────────

async fn send_introduction<S>(
    transport: &SecureTransport<S>,
    local_name: &str,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let identity = transport.identity();
    let intro = PeerIntroduction {
        name: local_name.to_string(),
        public_key: identity.public_key_bytes()?,
        algorithm: identity.algorithm().as_str().to_string(),
    };
    transport.send(&intro.to_bytes(), Route::Identity).await?;
    Ok(())
}

/// Read the peer's `Identity` envelope and verify it against the key it
/// announces. Possession of the private key is the only thing proven here;
/// whether to *trust* that key is the verifier's call.
async fn receive_introduction<S>(
    transport: &SecureTransport<S>,
) -> Result<PeerRecord, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (envelope, route) = transport.receive_envelope().await?;
    if route != Route::Identity {
        return Err(SessionError::UnexpectedRoute {
            expected: Route::Identity,
            actual: route,
        });
    }
    let intro = PeerIntroduction::from_bytes(&envelope.data)?;
    let algorithm = SignatureAlgorithm::parse(&intro.algorithm)?;
    envelope.verify(algorithm, &intro.public_key)?;
    Ok(PeerRecord::new(intro.name, algorithm, intro.public_key))
}

// ── Handshake helpers ─────────────────────────────────────────────────────────

fn check_handshake_fields(handshake: &Handshake, config: &Config) -> Result<(), SessionError> {
    if handshake.salt.len() != config.salt_size {
        return Err(ProtoError::InvalidPayload(format!(
            "salt must be {} bytes, got {}",
            config.salt_size,
            handshake.salt.len()
        ))
        .into());
    }
    let half = config.session_id_length / 2;
    if handshake.session_key.len() != half
        || !handshake
            .session_key
            .bytes()
            .all(|b| SESSION_ID_ALPHABET.contains(&b))
    {
        return Err(ProtoError::InvalidPayload(format!(
            "session key half must be {half} base-32 characters"
        ))
        .into());
    }
    Ok(())
}

fn direction_info(session_id: &str, direction: &[u8]) -> Vec<u8> {
    let mut info = Vec::with_capacity(session_id.len() + direction.len());
    info.extend_from_slice(session_id.as_bytes());
    info.extend_from_slice(direction);
    info
}

fn derive_challenge(
    shared_secret: &[u8; 32],
    session_id: &str,
    direction: &[u8],
    config: &Config,
) -> Result<Vec<u8>, SessionError> {
    let okm = kdf::derive(
        shared_secret,
        &[],
        &direction_info(session_id, direction),
        config.challenge_size,
    )?;
    Ok(okm.to_vec())
}

fn random_session_half(len: usize) -> String {
    (0..len)
        .map(|_| {
            let idx = OsRng.gen_range(0..SESSION_ID_ALPHABET.len());
            SESSION_ID_ALPHABET[idx] as char
        })
        .collect()
}

fn random_salt(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut salt = vec![0u8; len];
    OsRng.fill_bytes(&mut salt);
    salt
}

fn as_dh_key(bytes: &[u8]) -> Result<[u8; 32], SessionError> {
    bytes.try_into().map_err(|_| {
        veil_crypto::CryptoError::InvalidKey("ratchet public key must be 32 bytes".into()).into()
    })
}

/// Constant-time byte comparison; length mismatch still returns in time
/// proportional to the shorter input plus the comparison itself.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_half_uses_the_alphabet() {
        let half = random_session_half(10);
        assert_eq!(half.len(), 10);
        assert!(half.bytes().all(|b| SESSION_ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn challenge_is_deterministic_and_direction_bound() {
        let secret = [9u8; 32];
        let config = Config::default();
        let c1 = derive_challenge(&secret, "sessionid", CLIENT_TO_SERVER, &config).unwrap();
        let c2 = derive_challenge(&secret, "sessionid", CLIENT_TO_SERVER, &config).unwrap();
        let c3 = derive_challenge(&secret, "sessionid", SERVER_TO_CLIENT, &config).unwrap();
        assert_eq!(c1, c2);
        assert_ne!(c1, c3);
        assert_eq!(c1.len(), config.challenge_size);
    }

    #[test]
    fn handshake_field_checks() {
        let config = Config::default();
        let good = Handshake {
            key: vec![0; 8],
            salt: vec![0; 16],
            session_key: "abcdefghij".into(),
        };
        check_handshake_fields(&good, &config).unwrap();

        let bad_salt = Handshake {
            salt: vec![0; 8],
            ..good.clone()
        };
        assert!(check_handshake_fields(&bad_salt, &config).is_err());

        let bad_half = Handshake {
            session_key: "ABCDEFGHIJ".into(),
            ..good
        };
        assert!(check_handshake_fields(&bad_half, &config).is_err());
    }
}
