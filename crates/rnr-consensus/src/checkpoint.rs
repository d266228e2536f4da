//! Checkpointed finality. Every N blocks a checkpoint snapshots the block
//! hash, state root, and vote tally; once the tally clears two thirds of the
//! validator set the checkpoint finalizes and the chain below it becomes
//! immutable.

use crate::error::Result;
use parking_lot::Mutex;
use rnr_core::constants::consensus::{CHECKPOINT_INTERVAL, CHECKPOINT_SUPERMAJORITY};
use rnr_core::Hash;
use rnr_storage::{keys, FinalizedHeightProvider, KvStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u64,
    pub block_hash: Hash,
    pub state_root: Hash,
    pub validator_votes: usize,
    pub total_validators: usize,
    pub finalized: bool,
}

/// Two-thirds threshold: ceil(2/3 * total)
pub fn checkpoint_quorum(total_validators: usize) -> usize {
    (total_validators as f64 * CHECKPOINT_SUPERMAJORITY).ceil() as usize
}

struct CheckpointInner {
    finalized_height: u64,
    checkpoints: BTreeMap<u64, Checkpoint>,
}

pub struct CheckpointManager {
    kv: Arc<KvStore>,
    inner: Mutex<CheckpointInner>,
}

impl CheckpointManager {
    /// Open the manager, recovering the persisted finalized height
    pub fn open(kv: Arc<KvStore>) -> Result<Self> {
        let finalized_height = match kv.get(keys::FINALIZED_HEIGHT)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| rnr_storage::StorageError::SerializationError(
                        "finalized_height must be 8 bytes".to_string(),
                    ))?;
                u64::from_be_bytes(arr)
            }
            None => 0,
        };
        Ok(Self {
            kv,
            inner: Mutex::new(CheckpointInner { finalized_height, checkpoints: BTreeMap::new() }),
        })
    }

    /// Synthesize a checkpoint if `height` is on the interval. The vote
    /// tally comes from the block's voting session; a tally at or above the
    /// two-thirds quorum finalizes the checkpoint immediately.
    pub fn maybe_checkpoint(
        &self,
        height: u64,
        block_hash: Hash,
        state_root: Hash,
        validator_votes: usize,
        total_validators: usize,
    ) -> Result<Option<Checkpoint>> {
        if height == 0 || height % CHECKPOINT_INTERVAL != 0 {
            return Ok(None);
        }

        let finalized = validator_votes >= checkpoint_quorum(total_validators);
        let checkpoint = Checkpoint {
            height,
            block_hash,
            state_root,
            validator_votes,
            total_validators,
            finalized,
        };

        let mut inner = self.inner.lock();
        self.kv.put(&keys::checkpoint(height), &bincode::serialize(&checkpoint)?)?;

        if finalized && height > inner.finalized_height {
            inner.finalized_height = height;
            self.kv.put(keys::FINALIZED_HEIGHT, &height.to_be_bytes())?;
            info!(height, votes = validator_votes, total = total_validators, "checkpoint finalized");
        }

        inner.checkpoints.insert(height, checkpoint.clone());
        Ok(Some(checkpoint))
    }

    /// Greatest finalized checkpoint height; monotonic non-decreasing
    pub fn finalized_height(&self) -> u64 {
        self.inner.lock().finalized_height
    }

    /// A reorg may only touch heights strictly above the finalized height
    pub fn can_reorg(&self, height: u64) -> bool {
        height > self.finalized_height()
    }

    pub fn get(&self, height: u64) -> Option<Checkpoint> {
        self.inner.lock().checkpoints.get(&height).cloned()
    }

    /// Drop in-memory checkpoints below a height (periodic cleanup); the
    /// durable records stay until the pruner removes their blocks.
    pub fn trim(&self, min_height: u64) {
        self.inner.lock().checkpoints.retain(|height, _| *height >= min_height);
    }
}

impl FinalizedHeightProvider for CheckpointManager {
    fn last_finalized_height(&self) -> u64 {
        self.finalized_height()
    }
}
