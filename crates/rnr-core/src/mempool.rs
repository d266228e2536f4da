use crate::{Hash, Transaction};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    #[error("Mempool is full")]
    Full,
}

/// In-memory transaction pool keyed by transaction id.
///
/// Inserting an id that is already present is an idempotent no-op. Selection
/// for block production is fee-ordered and bounded by the proposer's dynamic
/// byte capacity.
pub struct Mempool {
    transactions: RwLock<HashMap<Hash, Transaction>>,
    max_size: usize,
}

impl Mempool {
    pub fn new(max_size: usize) -> Self {
        Self { transactions: RwLock::new(HashMap::new()), max_size }
    }

    /// Insert a validated transaction. Returns false when the id was already
    /// present (idempotent duplicate).
    pub fn insert(&self, tx: Transaction) -> Result<bool, MempoolError> {
        let id = tx.id();
        let mut txs = self.transactions.write();
        if txs.contains_key(&id) {
            return Ok(false);
        }
        if txs.len() >= self.max_size {
            return Err(MempoolError::Full);
        }
        txs.insert(id, tx);
        Ok(true)
    }

    /// Fee-sorted transactions up to a cumulative byte capacity.
    ///
    /// Order is fee descending with the id as a canonical tie-breaker so
    /// every node selects the same set for identical pools. Selection stops
    /// before the transaction that would push the estimate past the cap.
    pub fn select_for_capacity(&self, capacity_bytes: u64) -> Vec<Transaction> {
        let txs = self.transactions.read();
        let mut sorted: Vec<&Transaction> = txs.values().collect();
        sorted.sort_by(|a, b| b.fee.cmp(&a.fee).then_with(|| a.id().cmp(&b.id())));

        let mut selected = Vec::new();
        let mut used: u64 = 0;
        for tx in sorted {
            let size = tx.estimated_size();
            if used + size > capacity_bytes {
                break;
            }
            used += size;
            selected.push(tx.clone());
        }
        debug!(count = selected.len(), used_bytes = used, "selected transactions for block");
        selected
    }

    /// Remove transactions included in a committed block
    pub fn remove(&self, ids: &[Hash]) {
        let mut txs = self.transactions.write();
        for id in ids {
            txs.remove(id);
        }
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.transactions.read().contains_key(id)
    }

    pub fn get(&self, id: &Hash) -> Option<Transaction> {
        self.transactions.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, Amount};

    fn tx_with_fee(nonce: u64, fee: u64) -> Transaction {
        Transaction::new(
            Address::new([1u8; 20]),
            Address::new([2u8; 20]),
            Amount::from_u64(100),
            Amount::from_u64(fee),
            nonce,
            1_700_000_000,
            vec![0u8; 64],
            vec![],
        )
    }

    #[test]
    fn test_insert_and_len() {
        let mempool = Mempool::new(10);
        assert!(mempool.insert(tx_with_fee(0, 1)).unwrap());
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mempool = Mempool::new(10);
        let tx = tx_with_fee(0, 1);
        assert!(mempool.insert(tx.clone()).unwrap());
        assert!(!mempool.insert(tx).unwrap());
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_full_mempool_rejects() {
        let mempool = Mempool::new(1);
        mempool.insert(tx_with_fee(0, 1)).unwrap();
        assert!(matches!(mempool.insert(tx_with_fee(1, 1)), Err(MempoolError::Full)));
    }

    #[test]
    fn test_selection_is_fee_descending() {
        let mempool = Mempool::new(10);
        mempool.insert(tx_with_fee(0, 5)).unwrap();
        mempool.insert(tx_with_fee(1, 50)).unwrap();
        mempool.insert(tx_with_fee(2, 20)).unwrap();

        let selected = mempool.select_for_capacity(u64::MAX);
        let fees: Vec<String> = selected.iter().map(|t| t.fee.to_decimal_string()).collect();
        assert_eq!(fees, vec!["50", "20", "5"]);
    }

    #[test]
    fn test_selection_respects_capacity() {
        let mempool = Mempool::new(10);
        for nonce in 0..5 {
            mempool.insert(tx_with_fee(nonce, 10)).unwrap();
        }
        let one_size = tx_with_fee(0, 10).estimated_size();
        let selected = mempool.select_for_capacity(one_size * 2);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_remove_included() {
        let mempool = Mempool::new(10);
        let tx = tx_with_fee(0, 1);
        let id = tx.id();
        mempool.insert(tx).unwrap();
        mempool.remove(&[id]);
        assert!(mempool.is_empty());
    }
}
