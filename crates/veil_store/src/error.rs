use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Peer record expired")]
    Expired,

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] veil_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
