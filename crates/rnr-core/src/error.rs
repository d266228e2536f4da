use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Bad nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] rnr_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
