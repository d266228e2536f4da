use crate::Hash;
use rnr_crypto::sha256;
use serde::{Deserialize, Serialize};

/// A snapshot of the Proof-of-History chain, embedded in each block as an
/// ordering witness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PohStamp {
    pub tick: u64,
    pub hash: Hash,
}

impl PohStamp {
    pub fn genesis() -> Self {
        Self { tick: 0, hash: [0u8; 32] }
    }

    /// Byte key for lexicographic ordering: earlier ticks sort first, the
    /// chain hash breaks ties.
    pub fn ordering_key(&self) -> [u8; 40] {
        let mut key = [0u8; 40];
        key[..8].copy_from_slice(&self.tick.to_be_bytes());
        key[8..].copy_from_slice(&self.hash);
        key
    }
}

/// Monotonic hash chain advanced on a wall-clock cadence.
///
/// Each tick computes `hash_n = SHA-256(hash_{n-1} || n)`. The ticker owns no
/// lock; the node wraps it in a mutex and drives it from the 5 s PoH loop.
pub struct PohTicker {
    tick: u64,
    hash: Hash,
}

impl PohTicker {
    pub fn new(seed: Hash) -> Self {
        Self { tick: 0, hash: seed }
    }

    /// Resume from a previously observed stamp
    pub fn resume(stamp: PohStamp) -> Self {
        Self { tick: stamp.tick, hash: stamp.hash }
    }

    /// Advance the chain by one tick and return the new stamp
    pub fn tick(&mut self) -> PohStamp {
        self.tick += 1;
        let mut data = Vec::with_capacity(40);
        data.extend_from_slice(&self.hash);
        data.extend_from_slice(&self.tick.to_be_bytes());
        self.hash = sha256(&data);
        self.stamp()
    }

    /// Current stamp without advancing
    pub fn stamp(&self) -> PohStamp {
        PohStamp { tick: self.tick, hash: self.hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_are_monotonic() {
        let mut ticker = PohTicker::new([7u8; 32]);
        let s1 = ticker.tick();
        let s2 = ticker.tick();
        assert_eq!(s1.tick + 1, s2.tick);
        assert_ne!(s1.hash, s2.hash);
    }

    #[test]
    fn test_chain_is_deterministic() {
        let mut a = PohTicker::new([1u8; 32]);
        let mut b = PohTicker::new([1u8; 32]);
        for _ in 0..10 {
            assert_eq!(a.tick(), b.tick());
        }
    }

    #[test]
    fn test_ordering_key_sorts_by_tick_first() {
        let early = PohStamp { tick: 3, hash: [0xff; 32] };
        let late = PohStamp { tick: 4, hash: [0x00; 32] };
        assert!(early.ordering_key() < late.ordering_key());
    }

    #[test]
    fn test_resume_continues_chain() {
        let mut ticker = PohTicker::new([2u8; 32]);
        ticker.tick();
        let stamp = ticker.stamp();
        let mut resumed = PohTicker::resume(stamp);
        assert_eq!(ticker.tick(), resumed.tick());
    }
}
