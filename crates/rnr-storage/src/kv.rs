use crate::Result;
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

/// A single operation inside an atomic batch
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Sorted key-value engine backed by RocksDB.
///
/// All multi-key mutations go through `write_batch`, which the engine applies
/// atomically. Keys live in a single flat namespace; the canonical key
/// builders are in [`keys`].
pub struct KvStore {
    db: Arc<DB>,
    #[cfg(test)]
    fail_next_write: std::sync::atomic::AtomicBool,
}

impl KvStore {
    /// Open the store at the given path, creating it if missing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(10000);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            db: Arc::new(db),
            #[cfg(test)]
            fail_next_write: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_injected_failure()?;
        self.db.put(key, value)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.delete(key)?;
        Ok(())
    }

    /// Apply a batch of puts and deletes atomically
    pub fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.check_injected_failure()?;
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put(key, value) => batch.put(key, value),
                BatchOp::Delete(key) => batch.delete(key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// All (key, value) pairs whose key starts with `prefix`, in key order
    pub fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mode = rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward);
        let mut entries = Vec::new();
        for item in self.db.iterator(mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Compact the whole key range
    pub fn compact(&self) {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
    }

    #[cfg(test)]
    pub(crate) fn inject_write_failure(&self) {
        self.fail_next_write.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn check_injected_failure(&self) -> Result<()> {
        if self.fail_next_write.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::StorageError::DatabaseError("injected write failure".to_string()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_injected_failure(&self) -> Result<()> {
        Ok(())
    }
}

/// Canonical key builders for the persisted key space
pub mod keys {
    use rnr_core::{Address, Hash};

    pub const BLOCK_PREFIX: &[u8] = b"block_";
    pub const CURRENT_BLOCK: &[u8] = b"current_block";
    pub const ACCOUNT_PREFIX: &[u8] = b"account_";
    pub const VALIDATOR_PREFIX: &[u8] = b"validator_";
    pub const CHECKPOINT_PREFIX: &[u8] = b"checkpoint_";
    pub const FINALIZED_HEIGHT: &[u8] = b"finalized_height";
    pub const VOTE_PREFIX: &[u8] = b"vote_";
    pub const SLASHING_PREFIX: &[u8] = b"slashing_";
    pub const ORPHAN_PREFIX: &[u8] = b"orphan_";

    pub fn block(height: u64) -> Vec<u8> {
        format!("block_{height}").into_bytes()
    }

    pub fn account(address: &Address) -> Vec<u8> {
        format!("account_{address}").into_bytes()
    }

    pub fn validator(id: &Address) -> Vec<u8> {
        format!("validator_{id}").into_bytes()
    }

    pub fn checkpoint(height: u64) -> Vec<u8> {
        format!("checkpoint_{height}").into_bytes()
    }

    pub fn vote(vote_id: &Hash) -> Vec<u8> {
        format!("vote_{}", hex::encode(vote_id)).into_bytes()
    }

    pub fn slashing(id: &Address, height: u64) -> Vec<u8> {
        format!("slashing_{id}_{height}").into_bytes()
    }

    /// Orphans are keyed by the first 8 bytes of the block hash
    pub fn orphan(block_hash: &Hash) -> Vec<u8> {
        format!("orphan_{}", hex::encode(&block_hash[..8])).into_bytes()
    }
}
