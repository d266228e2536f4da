use rnr_core::{Address, Hash};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid VRF: {0}")]
    InvalidVrf(String),

    #[error("Double vote by {validator} on block {block_hash}")]
    DoubleVote { validator: Address, block_hash: String },

    #[error("Replay detected for vote {0}")]
    ReplayDetected(String),

    #[error("Validator {0} is suspended")]
    SuspendedValidator(Address),

    #[error("Validator {0} is not eligible to vote")]
    IneligibleVoter(Address),

    #[error("Wrong proposer: expected {expected}, got {actual}")]
    NotProposer { expected: Address, actual: Address },

    #[error("No eligible validators")]
    NoEligibleValidators,

    #[error("No voting session for block {0}")]
    SessionNotFound(String),

    #[error("Voting deadline exceeded for block {0}")]
    DeadlineExceeded(String),

    #[error("Reorg blocked: candidate at height {candidate} does not clear finalized height {finalized}")]
    ReorgBlocked { candidate: u64, finalized: u64 },

    #[error("Fork choice tie between {main:?} and {candidate:?}")]
    ForkChoiceTie { main: Hash, candidate: Hash },

    #[error("Orphan block deferred: parent {0} unknown")]
    OrphanDeferred(String),

    #[error("Validator not found: {0}")]
    ValidatorNotFound(Address),

    #[error("Validator already registered: {0}")]
    ValidatorAlreadyExists(Address),

    #[error("Insufficient balance for entry fee")]
    InsufficientBalance,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Storage fault: {0}")]
    StorageFault(#[from] rnr_storage::StorageError),

    #[error("Core error: {0}")]
    Core(#[from] rnr_core::CoreError),
}

impl From<bincode::Error> for ConsensusError {
    fn from(err: bincode::Error) -> Self {
        ConsensusError::StorageFault(rnr_storage::StorageError::from(err))
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
