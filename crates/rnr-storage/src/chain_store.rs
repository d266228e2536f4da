use crate::kv::{keys, BatchOp, KvStore};
use crate::{Result, StorageError};
use parking_lot::RwLock;
use rnr_core::Block;
use std::sync::Arc;
use tracing::{info, warn};

/// The main-chain block index.
///
/// Exclusively owns the `block_{height}` / `current_block` key range. At most
/// one block per height: `add_block` holds the write lock across the
/// linkage check and the durable write.
pub struct ChainStore {
    kv: Arc<KvStore>,
    tip: RwLock<Block>,
}

impl ChainStore {
    /// Open the chain store, recovering the tip from KV or writing the given
    /// genesis block into a fresh database.
    pub fn open(kv: Arc<KvStore>, genesis: Block) -> Result<Self> {
        let tip = match kv.get(keys::CURRENT_BLOCK)? {
            Some(bytes) => {
                let tip: Block = bincode::deserialize(&bytes)?;
                info!(height = tip.height(), "chain store recovered tip");
                tip
            }
            None => {
                let bytes = bincode::serialize(&genesis)?;
                kv.write_batch(vec![
                    BatchOp::Put(keys::block(0), bytes.clone()),
                    BatchOp::Put(keys::CURRENT_BLOCK.to_vec(), bytes),
                ])?;
                info!("chain store initialized at genesis");
                genesis
            }
        };
        Ok(Self { kv, tip: RwLock::new(tip) })
    }

    /// Current tip snapshot
    pub fn tip(&self) -> Block {
        self.tip.read().clone()
    }

    pub fn height(&self) -> u64 {
        self.tip.read().height()
    }

    /// Append a block to the main chain. The block must link to the current
    /// tip by height and hash.
    pub fn add_block(&self, block: Block) -> Result<()> {
        let mut tip = self.tip.write();

        if block.height() != tip.height() + 1 {
            return Err(StorageError::NotOnTip { expected: tip.height() + 1, got: block.height() });
        }
        if block.header.prev_hash != tip.hash() {
            return Err(StorageError::PrevHashMismatch(block.height()));
        }

        let bytes = bincode::serialize(&block)?;
        self.kv.write_batch(vec![
            BatchOp::Put(keys::block(block.height()), bytes.clone()),
            BatchOp::Put(keys::CURRENT_BLOCK.to_vec(), bytes),
        ])?;

        *tip = block;
        Ok(())
    }

    /// Fetch a main-chain block by height
    pub fn get_block(&self, height: u64) -> Result<Option<Block>> {
        match self.kv.get(&keys::block(height))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Roll the main chain back so that `ancestor_height` becomes the tip.
    /// Deletes every `block_{h}` key above the ancestor.
    pub fn rollback_to(&self, ancestor_height: u64) -> Result<()> {
        let mut tip = self.tip.write();
        let current = tip.height();
        if ancestor_height >= current {
            return Ok(());
        }

        let ancestor = self
            .get_block(ancestor_height)?
            .ok_or(StorageError::BlockNotFound(ancestor_height))?;

        let mut ops: Vec<BatchOp> = (ancestor_height + 1..=current)
            .map(|h| BatchOp::Delete(keys::block(h)))
            .collect();
        ops.push(BatchOp::Put(keys::CURRENT_BLOCK.to_vec(), bincode::serialize(&ancestor)?));
        self.kv.write_batch(ops)?;

        warn!(from = current, to = ancestor_height, "main chain rolled back");
        *tip = ancestor;
        Ok(())
    }
}
