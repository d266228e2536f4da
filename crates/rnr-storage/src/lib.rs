pub mod chain_store;
pub mod error;
pub mod kv;
pub mod pruner;
pub mod state;

pub use chain_store::ChainStore;
pub use error::{Result, StorageError};
pub use kv::{keys, BatchOp, KvStore};
pub use pruner::{FinalizedHeightProvider, PruneStats, StatePruner};
pub use state::{BlockApplyOutcome, StateStore, StateTransaction};
