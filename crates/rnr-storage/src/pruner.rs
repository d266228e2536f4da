use crate::kv::{keys, BatchOp, KvStore};
use crate::Result;
use parking_lot::Mutex;
use rnr_core::Block;
use std::sync::Arc;
use tracing::info;

/// The single capability the pruner needs from the finality layer
pub trait FinalizedHeightProvider: Send + Sync {
    fn last_finalized_height(&self) -> u64;
}

#[derive(Debug, Clone, Default)]
pub struct PruneStats {
    pub blocks_pruned: u64,
    pub orphans_pruned: u64,
}

/// Prunes block bodies below (finalized - retention) and garbage-collects
/// orphans that can no longer win a reorg, then compacts.
pub struct StatePruner {
    kv: Arc<KvStore>,
    finality: Arc<dyn FinalizedHeightProvider>,
    retention_blocks: u64,
    last_pruned_below: Mutex<u64>,
}

impl StatePruner {
    pub fn new(
        kv: Arc<KvStore>,
        finality: Arc<dyn FinalizedHeightProvider>,
        retention_blocks: u64,
    ) -> Self {
        Self { kv, finality, retention_blocks, last_pruned_below: Mutex::new(0) }
    }

    pub fn prune(&self) -> Result<PruneStats> {
        let finalized = self.finality.last_finalized_height();
        let cutoff = finalized.saturating_sub(self.retention_blocks);
        if cutoff == 0 {
            return Ok(PruneStats::default());
        }

        let mut stats = PruneStats::default();
        let mut last = self.last_pruned_below.lock();

        // Block bodies strictly below the cutoff are no longer needed; the
        // finalized checkpoint chain above the cutoff stays intact.
        let mut ops = Vec::new();
        for height in *last..cutoff {
            let key = keys::block(height);
            if self.kv.get(&key)?.is_some() {
                ops.push(BatchOp::Delete(key));
                stats.blocks_pruned += 1;
            }
        }

        for (key, value) in self.kv.prefix_iter(keys::ORPHAN_PREFIX)? {
            let Ok(orphan) = bincode::deserialize::<Block>(&value) else {
                ops.push(BatchOp::Delete(key));
                stats.orphans_pruned += 1;
                continue;
            };
            if orphan.height() < cutoff {
                ops.push(BatchOp::Delete(key));
                stats.orphans_pruned += 1;
            }
        }

        if !ops.is_empty() {
            self.kv.write_batch(ops)?;
            self.kv.compact();
            info!(
                blocks = stats.blocks_pruned,
                orphans = stats.orphans_pruned,
                below = cutoff,
                "pruned state"
            );
        }
        *last = cutoff;
        Ok(stats)
    }
}
