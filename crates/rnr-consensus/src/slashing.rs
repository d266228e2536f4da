//! Rule-based suspensions. Each offense carries a fixed suspension duration;
//! the registry applies the suspension and the sweep lifts it automatically.

use crate::error::Result;
use crate::registry::ValidatorRegistry;
use parking_lot::Mutex;
use rnr_core::Address;
use rnr_storage::{keys, KvStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Bounded slash history kept in memory for queries
const MAX_SLASH_HISTORY: usize = 10_000;

/// Offenses and their suspension durations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SlashReason {
    InvalidVote,
    Downtime,
    DoubleVoting,
    InvalidBlock,
    MaliciousBehavior,
}

impl SlashReason {
    pub fn suspension_secs(&self) -> u64 {
        match self {
            SlashReason::InvalidVote => 3600,
            SlashReason::Downtime => 6 * 3600,
            SlashReason::DoubleVoting => 24 * 3600,
            SlashReason::InvalidBlock => 24 * 3600,
            SlashReason::MaliciousBehavior => 24 * 3600,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlashReason::InvalidVote => "invalid_vote",
            SlashReason::Downtime => "downtime",
            SlashReason::DoubleVoting => "double_voting",
            SlashReason::InvalidBlock => "invalid_block",
            SlashReason::MaliciousBehavior => "malicious_behavior",
        }
    }
}

/// Durable record of one slashing decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlashingEvent {
    pub validator: Address,
    pub reason: SlashReason,
    pub height: u64,
    /// Opaque but reproducible from the detection context, e.g. the two
    /// conflicting block hashes for double voting
    pub evidence: Vec<u8>,
    pub timestamp: u64,
    pub suspension_end: u64,
}

pub struct SlashingManager {
    kv: Arc<KvStore>,
    registry: Arc<ValidatorRegistry>,
    history: Mutex<Vec<SlashingEvent>>,
}

impl SlashingManager {
    pub fn new(kv: Arc<KvStore>, registry: Arc<ValidatorRegistry>) -> Self {
        Self { kv, registry, history: Mutex::new(Vec::new()) }
    }

    /// Record the offense durably and delegate the suspension to the
    /// registry.
    pub fn slash(
        &self,
        validator: Address,
        reason: SlashReason,
        height: u64,
        evidence: Vec<u8>,
        now: u64,
    ) -> Result<SlashingEvent> {
        let event = SlashingEvent {
            validator,
            reason,
            height,
            evidence,
            timestamp: now,
            suspension_end: now + reason.suspension_secs(),
        };

        self.kv
            .put(&keys::slashing(&validator, height), &bincode::serialize(&event)?)
            .map_err(crate::error::ConsensusError::StorageFault)?;
        self.registry.suspend(&validator, event.suspension_end, reason.as_str())?;

        warn!(
            validator = %validator,
            reason = reason.as_str(),
            height,
            until = event.suspension_end,
            "validator slashed"
        );

        let mut history = self.history.lock();
        history.push(event.clone());
        if history.len() > MAX_SLASH_HISTORY {
            let drain = history.len() - MAX_SLASH_HISTORY;
            history.drain(..drain);
        }

        Ok(event)
    }

    pub fn history_for(&self, validator: &Address) -> Vec<SlashingEvent> {
        self.history.lock().iter().filter(|e| e.validator == *validator).cloned().collect()
    }

    /// Trim in-memory history below a height (periodic cleanup)
    pub fn trim_history(&self, min_height: u64) {
        self.history.lock().retain(|e| e.height >= min_height);
    }
}
