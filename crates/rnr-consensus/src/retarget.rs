//! PoB difficulty retargeting over a 50-block sliding window of active
//! validator counts. A shrinking fleet loosens the bandwidth thresholds so
//! more nodes qualify; a crowded fleet tightens them.

use parking_lot::{Mutex, RwLock};
use rnr_core::constants::pob;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::info;

/// The three PoB quality thresholds subject to retargeting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PobThresholds {
    pub min_upload_mbps: f64,
    pub target_latency_ms: f64,
    pub target_packet_loss_pct: f64,
}

impl Default for PobThresholds {
    fn default() -> Self {
        Self {
            min_upload_mbps: pob::MIN_UPLOAD_MBPS,
            target_latency_ms: pob::TARGET_LATENCY_MS,
            target_packet_loss_pct: pob::TARGET_PACKET_LOSS_PCT,
        }
    }
}

pub struct PobRetargetManager {
    window: Mutex<VecDeque<usize>>,
    thresholds: RwLock<PobThresholds>,
}

impl PobRetargetManager {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(pob::RETARGET_WINDOW)),
            thresholds: RwLock::new(PobThresholds::default()),
        }
    }

    pub fn thresholds(&self) -> PobThresholds {
        *self.thresholds.read()
    }

    /// Record the active-validator count observed after a finalized block
    pub fn record_sample(&self, active_validators: usize) {
        let mut window = self.window.lock();
        if window.len() == pob::RETARGET_WINDOW {
            window.pop_front();
        }
        window.push_back(active_validators);
    }

    /// At each retarget boundary (height % 50 == 0), adjust thresholds by
    /// +-20% based on the window mean and clamp to the absolute bounds.
    /// Returns the new thresholds when an adjustment was applied.
    pub fn maybe_retarget(&self, height: u64) -> Option<PobThresholds> {
        if height == 0 || height % pob::RETARGET_WINDOW as u64 != 0 {
            return None;
        }

        let mean = {
            let window = self.window.lock();
            if window.is_empty() {
                return None;
            }
            window.iter().sum::<usize>() as f64 / window.len() as f64
        };

        let adjustment = if mean < 50.0 {
            -pob::MAX_ADJUSTMENT
        } else if mean > 500.0 {
            pob::MAX_ADJUSTMENT
        } else {
            return None;
        };

        let mut thresholds = self.thresholds.write();
        thresholds.min_upload_mbps =
            (thresholds.min_upload_mbps * (1.0 + adjustment)).clamp(5.0, 10.0);
        thresholds.target_latency_ms =
            (thresholds.target_latency_ms * (1.0 - adjustment)).clamp(50.0, 200.0);
        thresholds.target_packet_loss_pct =
            (thresholds.target_packet_loss_pct * (1.0 - adjustment)).clamp(0.05, 0.5);

        info!(
            height,
            mean_validators = mean,
            adjustment,
            min_upload = thresholds.min_upload_mbps,
            latency = thresholds.target_latency_ms,
            packet_loss = thresholds.target_packet_loss_pct,
            "PoB thresholds retargeted"
        );
        Some(*thresholds)
    }
}

impl Default for PobRetargetManager {
    fn default() -> Self {
        Self::new()
    }
}
