//! TCP entry points: dial out, or listen and serve sessions.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use veil_crypto::identity::Identity;
use veil_store::TrustStore;

use crate::{config::Config, error::SessionError, session::Session, verifier::RemoteVerifier};

/// Connect to a peer and establish a session as the initiator.
pub async fn dial(
    addr: &str,
    identity: Arc<Identity>,
    local_name: &str,
    store: &TrustStore,
    verifier: &RemoteVerifier,
    config: &Config,
) -> Result<Session<TcpStream>, SessionError> {
    let stream = match config.dial_deadline {
        Some(deadline) => tokio::time::timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "dial deadline exceeded",
                ))
            })??,
        None => TcpStream::connect(addr).await?,
    };
    stream.set_nodelay(true)?;
    Session::connect(stream, identity, local_name, store, verifier, config).await
}

/// What to do with each session the listener establishes.
#[async_trait::async_trait]
pub trait SessionAcceptor: Send + Sync {
    async fn accepted(&self, session: Session<TcpStream>) -> anyhow::Result<()>;
}

/// Accept loop: one task per connection. Establishment failures are logged
/// and do not stop the listener.
pub async fn listen_and_serve(
    addr: &str,
    identity: Arc<Identity>,
    local_name: &str,
    store: TrustStore,
    verifier: RemoteVerifier,
    config: Config,
    acceptor: Arc<dyn SessionAcceptor>,
) -> Result<(), SessionError> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening for peers");
    let local_name = local_name.to_string();

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let identity = identity.clone();
        let store = store.clone();
        let verifier = verifier.clone();
        let config = config.clone();
        let acceptor = acceptor.clone();
        let local_name = local_name.clone();

        tokio::spawn(async move {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!(%peer_addr, error = %e, "failed to set nodelay");
            }
            match Session::accept(stream, identity, &local_name, &store, &verifier, &config).await
            {
                Ok(session) => {
                    tracing::info!(%peer_addr, session = %session.session_id(), "session accepted");
                    if let Err(e) = acceptor.accepted(session).await {
                        tracing::error!(%peer_addr, error = %e, "session handler failed");
                    }
                }
                Err(e) => {
                    tracing::error!(%peer_addr, error = %e, "session establishment failed");
                }
            }
        });
    }
}
