//! Remote-peer verification policy.
//!
//! The verifier is the single place where trust decisions happen during an
//! introduction. It runs outside every lock and may block — a real
//! deployment can prompt the user with the peer's fingerprint here.

use std::sync::Arc;

use veil_store::{PeerRecord, StoreError, TrustStore};

use crate::error::SessionError;

/// Called with the store and the freshly introduced peer; `Err` aborts the
/// session without touching the store.
pub type RemoteVerifier =
    Arc<dyn Fn(&TrustStore, &PeerRecord) -> Result<(), SessionError> + Send + Sync>;

/// Trust-on-first-use: an unknown peer is pinned on first contact, a known
/// peer must present exactly the pinned key.
///
/// A peer presenting a *different* key under a known name is refused hard.
/// Re-verification after a legitimate key rotation is an out-of-band
/// decision; it never happens silently here.
pub fn tofu_verifier() -> RemoteVerifier {
    Arc::new(|store, peer| {
        match store.find_peer(&peer.key_hash()) {
            Ok(known) => {
                // Same hash implies same key; double-check the bytes anyway.
                if known.public_key == peer.public_key {
                    Ok(())
                } else {
                    Err(SessionError::VerificationFailed(format!(
                        "stored key for {} does not match presented key",
                        peer.name
                    )))
                }
            }
            Err(StoreError::NotFound) | Err(StoreError::Expired) => {
                let key_changed = store.query(|view| {
                    view.peers()
                        .any(|known| known.name == peer.name && known.public_key != peer.public_key)
                });
                if key_changed {
                    return Err(SessionError::VerificationFailed(format!(
                        "identity key changed for known peer {}; re-verify out of band",
                        peer.name
                    )));
                }
                tracing::info!(peer = %peer.name, fingerprint = %veil_crypto::identity::fingerprint(&peer.public_key), "pinning new peer");
                store.store_peer(peer.clone());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use veil_crypto::identity::SignatureAlgorithm;

    fn store() -> TrustStore {
        TrustStore::new(Duration::from_secs(3600))
    }

    fn peer(name: &str, key: &[u8]) -> PeerRecord {
        PeerRecord::new(name.into(), SignatureAlgorithm::Ed25519, key.to_vec())
    }

    #[test]
    fn first_use_pins_the_peer() {
        let store = store();
        let verify = tofu_verifier();
        let alice = peer("alice", b"key-one");

        verify(&store, &alice).unwrap();
        assert!(store.find_peer(&alice.key_hash()).is_ok());
        // Second contact with the same key is fine.
        verify(&store, &alice).unwrap();
    }

    #[test]
    fn changed_key_is_refused() {
        let store = store();
        let verify = tofu_verifier();
        verify(&store, &peer("alice", b"key-one")).unwrap();

        let imposter = peer("alice", b"key-two");
        assert!(matches!(
            verify(&store, &imposter),
            Err(SessionError::VerificationFailed(_))
        ));
        // The imposter key was not pinned.
        assert!(store.find_peer(&imposter.key_hash()).is_err());
    }

    #[test]
    fn distinct_peers_coexist() {
        let store = store();
        let verify = tofu_verifier();
        verify(&store, &peer("alice", b"key-a")).unwrap();
        verify(&store, &peer("bob", b"key-b")).unwrap();
    }
}
