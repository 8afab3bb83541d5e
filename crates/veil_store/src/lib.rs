//! veil_store — peer trust database and encrypted record storage
//!
//! The store is shared by every session on a node. It answers one
//! security-critical question — "have I seen this peer's key before?" —
//! and offers generic buckets for anything the caller wants to persist
//! (identity keys, saved session state), optionally encrypted under a
//! passphrase-derived key held by the [`vault::Vault`].
//!
//! # Modules
//! - `models` — peer records
//! - `vault`  — in-memory key-wrapping key, unlocked by passphrase
//! - `store`  — the trust store proper: peers, buckets, transactions

pub mod error;
pub mod models;
pub mod store;
pub mod vault;

pub use error::StoreError;
pub use models::PeerRecord;
pub use store::TrustStore;
pub use vault::Vault;
