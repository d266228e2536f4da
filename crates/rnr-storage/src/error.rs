use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Block not found at height {0}")]
    BlockNotFound(u64),

    #[error("Block {got} does not extend the chain tip {expected}")]
    NotOnTip { expected: u64, got: u64 },

    #[error("Previous hash mismatch at height {0}")]
    PrevHashMismatch(u64),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Bad nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<rnr_core::CoreError> for StorageError {
    fn from(err: rnr_core::CoreError) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
