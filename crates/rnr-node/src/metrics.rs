use std::sync::atomic::{AtomicU64, Ordering};

/// Node metrics registry. The Prometheus endpoint itself lives in the
/// telemetry layer; the core keeps the counters and renders the text format.
pub struct NodeMetrics {
    pub block_height: AtomicU64,
    pub finalized_height: AtomicU64,
    pub mempool_size: AtomicU64,
    pub active_validators: AtomicU64,
    pub votes_processed: AtomicU64,
    pub blocks_proposed: AtomicU64,
    pub reorgs: AtomicU64,
    pub slashing_events: AtomicU64,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            block_height: AtomicU64::new(0),
            finalized_height: AtomicU64::new(0),
            mempool_size: AtomicU64::new(0),
            active_validators: AtomicU64::new(0),
            votes_processed: AtomicU64::new(0),
            blocks_proposed: AtomicU64::new(0),
            reorgs: AtomicU64::new(0),
            slashing_events: AtomicU64::new(0),
        }
    }
}

impl NodeMetrics {
    /// Render the Prometheus text exposition format
    pub fn export(&self) -> String {
        format!(
            r#"# HELP rnr_block_height Current main chain height
# TYPE rnr_block_height gauge
rnr_block_height {}

# HELP rnr_finalized_height Last finalized checkpoint height
# TYPE rnr_finalized_height gauge
rnr_finalized_height {}

# HELP rnr_mempool_size Pending transactions in the mempool
# TYPE rnr_mempool_size gauge
rnr_mempool_size {}

# HELP rnr_active_validators Active non-suspended validators
# TYPE rnr_active_validators gauge
rnr_active_validators {}

# HELP rnr_votes_total Votes processed
# TYPE rnr_votes_total counter
rnr_votes_total {}

# HELP rnr_blocks_proposed_total Blocks proposed by this node
# TYPE rnr_blocks_proposed_total counter
rnr_blocks_proposed_total {}

# HELP rnr_reorgs_total Chain reorganizations
# TYPE rnr_reorgs_total counter
rnr_reorgs_total {}

# HELP rnr_slashing_events_total Slashing events executed
# TYPE rnr_slashing_events_total counter
rnr_slashing_events_total {}
"#,
            self.block_height.load(Ordering::Relaxed),
            self.finalized_height.load(Ordering::Relaxed),
            self.mempool_size.load(Ordering::Relaxed),
            self.active_validators.load(Ordering::Relaxed),
            self.votes_processed.load(Ordering::Relaxed),
            self.blocks_proposed.load(Ordering::Relaxed),
            self.reorgs.load(Ordering::Relaxed),
            self.slashing_events.load(Ordering::Relaxed),
        )
    }
}
