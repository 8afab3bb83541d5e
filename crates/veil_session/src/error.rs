use thiserror::Error;

use veil_proto::Route;

use crate::phase::Phase;

#[derive(Debug, Error)]
pub enum SessionError {
    // ── Transport ────────────────────────────────────────────────────────
    #[error("Connection closed")]
    ConnClosed,

    #[error("Message of {size} bytes exceeds transport limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Framing / crypto ─────────────────────────────────────────────────
    #[error(transparent)]
    Proto(#[from] veil_proto::ProtoError),

    #[error(transparent)]
    Crypto(#[from] veil_crypto::CryptoError),

    // ── Protocol ─────────────────────────────────────────────────────────
    #[error("Unexpected route: expected {expected:?}, got {actual:?}")]
    UnexpectedRoute { expected: Route, actual: Route },

    #[error("Route {0:?} is not valid here")]
    InvalidRoute(Route),

    #[error("Peer verification failed: {0}")]
    VerificationFailed(String),

    #[error("Sequence counters diverged (local {local}, remote {remote})")]
    OutOfSync { local: u64, remote: u64 },

    #[error("Phase cannot move from {from:?} to {to:?}")]
    InvalidPhaseTransition { from: Phase, to: Phase },

    // ── Policy / state ───────────────────────────────────────────────────
    #[error("Store error: {0}")]
    Store(#[from] veil_store::StoreError),

    #[error("Router is closed")]
    RouterClosed,

    #[error("Handler already registered for route {0:?}")]
    HandlerExists(Route),

    #[error("No handler registered for route {0:?}")]
    NoHandler(Route),

    #[error("Handler failed: {0}")]
    InvalidHandler(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Resumption failed: {0}")]
    ResumptionFailed(String),
}
