//! veil_session — session establishment and encrypted transport for
//! Veil Secure Channel
//!
//! The full path from an untrusted byte stream to an authenticated,
//! end-to-end-encrypted channel with continuous rekeying:
//!
//! ```text
//! TcpStream / any AsyncRead+AsyncWrite
//!   └─ FramedConn        u16-BE length-prefixed frames, per-frame deadlines
//!        └─ SecureTransport   signed envelopes; AEAD, then ratchet encryption
//!             └─ Session       establishment, payload traffic, save/resume
//!                  └─ Router   per-route handlers + middleware
//! ```
//!
//! # Modules
//! - `config`    — the configuration record
//! - `framing`   — length-prefixed framing with deadlines
//! - `phase`     — ordered session lifecycle states
//! - `router`    — route dispatch, recovery and phase-gate middleware
//! - `transport` — per-message encryption and route handling
//! - `handshake` — the four-stage establishment protocol
//! - `verifier`  — peer trust policy (TOFU by default)
//! - `session`   — the established channel, persistence, resumption
//! - `net`       — TCP dial / listen-and-serve
//! - `error`     — unified error type

pub mod config;
pub mod error;
pub mod framing;
mod handshake;
pub mod net;
pub mod phase;
pub mod router;
pub mod session;
pub mod transport;
pub mod verifier;

pub use config::Config;
pub use error::SessionError;
pub use net::{dial, listen_and_serve, SessionAcceptor};
pub use phase::Phase;
pub use router::{phase_required, recovery, Handler, HandlerRequest, Middleware, Router};
pub use session::{Session, SessionState};
pub use verifier::{tofu_verifier, RemoteVerifier};
