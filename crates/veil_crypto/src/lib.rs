//! veil_crypto — Veil Secure Channel cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Wire-facing parsers are fallible; malformed peer input is an error,
//!   never a panic.
//!
//! # Module layout
//! - `identity` — long-term signing identities (Ed25519 and ML-DSA-65)
//! - `kem`      — ML-KEM-768 encapsulation for the handshake secret
//! - `dh`       — X25519 keypairs for the ratchet
//! - `ratchet`  — continuous key update: root chain + per-direction chains
//! - `aead`     — XChaCha20-Poly1305 cipher bound to a derived key
//! - `kdf`      — HKDF-SHA512 derivation + ratchet chain KDFs + Argon2id vault key
//! - `error`    — unified error type

pub mod aead;
pub mod dh;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod kem;
pub mod ratchet;

pub use error::CryptoError;
