//! Protocol constants. Values here are consensus-critical: changing any of
//! them forks the chain.

/// Consensus timing and thresholds
pub mod consensus {
    /// Seconds per block-production slot
    pub const BLOCK_TIME_SECS: u64 = 30;
    /// Seconds between PoH ticks
    pub const POH_TICK_SECS: u64 = 5;
    /// Block propagation phase within a slot
    pub const PROPAGATION_PHASE_SECS: u64 = 10;
    /// Verification and voting phase within a slot
    pub const VERIFICATION_VOTING_PHASE_SECS: u64 = 15;
    /// Fraction of active validators required to finalize a block
    pub const SUPERMAJORITY: f64 = 0.85;
    /// Fraction of validators required to finalize a checkpoint
    pub const CHECKPOINT_SUPERMAJORITY: f64 = 2.0 / 3.0;
    /// Checkpoint every N blocks
    pub const CHECKPOINT_INTERVAL: u64 = 100;
    /// A block introducing more than this many never-before-seen addresses
    /// is rejected (address-grinding spam defense)
    pub const MAX_NEW_ADDRESSES_PER_BLOCK: usize = 15;
    /// A candidate chain this many blocks ahead of the main tip wins fork
    /// choice regardless of cumulative work
    pub const SAFETY_OVERRIDE_DEPTH: u64 = 6;
}

/// Proof-of-Bandwidth parameters
pub mod pob {
    /// Minimum sustained upload bandwidth threshold (MB/s)
    pub const MIN_UPLOAD_MBPS: f64 = 7.0;
    /// Target round-trip latency threshold (ms)
    pub const TARGET_LATENCY_MS: f64 = 100.0;
    /// Target packet loss threshold (%)
    pub const TARGET_PACKET_LOSS_PCT: f64 = 0.1;
    /// Minimum PoB score for observer activation
    pub const MIN_POB_SCORE: f64 = 0.85;
    /// Retarget window in blocks
    pub const RETARGET_WINDOW: usize = 50;
    /// Maximum threshold adjustment per retarget window
    pub const MAX_ADJUSTMENT: f64 = 0.20;
    /// Fraction of measured upload bandwidth available for a single block
    pub const CAPACITY_FACTOR: f64 = 0.30;
    /// Seconds of bandwidth a block capacity is sized for
    pub const CAPACITY_WINDOW_SECS: f64 = 10.0;
    /// Lower clamp on dynamic block capacity
    pub const MIN_BLOCK_CAPACITY_BYTES: u64 = 5 * 1024 * 1024;
    /// Upper clamp on dynamic block capacity
    pub const MAX_BLOCK_CAPACITY_BYTES: u64 = 300 * 1024 * 1024;

    /// Dynamic per-proposer block capacity in bytes, derived from the
    /// proposer's own measured upload bandwidth (MB/s). A missing or
    /// non-positive measurement falls back to the protocol floor.
    pub fn dynamic_block_capacity(upload_mbps: f64) -> u64 {
        let bandwidth = if upload_mbps > 0.0 { upload_mbps } else { MIN_UPLOAD_MBPS };
        let raw = CAPACITY_FACTOR * bandwidth * CAPACITY_WINDOW_SECS * 1_048_576.0;
        (raw as u64).clamp(MIN_BLOCK_CAPACITY_BYTES, MAX_BLOCK_CAPACITY_BYTES)
    }
}

/// Economic parameters
pub mod economics {
    /// Base units per bandwidth credit (1e8 precision scale)
    pub const CREDIT_SCALE: u64 = 100_000_000;
    /// base_fee = amount / BASE_FEE_DIVISOR, debited and burned
    pub const BASE_FEE_DIVISOR: u64 = 10_000_000_000;
    /// Entry fee bandwidth rate (MB/s held for the observer period)
    pub const ENTRY_FEE_MBPS: u64 = 7;
    /// Proposer share of the block reward (percent)
    pub const PROPOSER_REWARD_PCT: u64 = 80;
    /// PoB contributor share of the block reward (percent)
    pub const CONTRIBUTOR_REWARD_PCT: u64 = 20;
    /// Block reward decays by one credit per this many blocks
    pub const REWARD_DECAY_BLOCKS: u64 = 1_000_000;
    /// Initial block reward in credits
    pub const INITIAL_REWARD_CREDITS: u64 = 100;
}

/// Validator lifecycle parameters
pub mod lifecycle {
    /// Observer period floor (fleets of up to 100 validators)
    pub const OBSERVER_FLOOR_SECS: u64 = 6 * 3600;
    /// Observer period ceiling (fleets of 1000 validators and up)
    pub const OBSERVER_CEIL_SECS: u64 = 24 * 3600;
    /// Fleet size at which the observer period starts growing
    pub const FLEET_FLOOR: usize = 100;
    /// Fleet size at which the observer period stops growing
    pub const FLEET_CEIL: usize = 1000;
    /// Delay between an exit request and removal
    pub const EXIT_DELAY_SECS: u64 = 6 * 3600;
}

/// Storage parameters
pub mod storage {
    /// Default number of blocks kept below the finalized checkpoint
    pub const DEFAULT_RETENTION_BLOCKS: u64 = 1000;
}

/// Transaction intake parameters
pub mod intake {
    /// Accepted clock skew on submitted transaction timestamps (seconds)
    pub const MAX_TIMESTAMP_SKEW_SECS: u64 = 300;
}
