//! Validator registration and lifecycle: observer -> active -> suspended ->
//! exited. Registration burns a bandwidth-denominated entry fee; activation,
//! exits, and suspension expiry are driven by the periodic maintenance sweep.

use crate::error::{ConsensusError, Result};
use rnr_core::constants::{economics, lifecycle, pob};
use rnr_core::{Address, Amount, ValidatorInfo};
use rnr_storage::StateStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Observer period scaled to fleet size: 6 h up to 100 validators, growing
/// linearly to 24 h at 1000, constant beyond.
pub fn observer_duration_secs(fleet_size: usize) -> u64 {
    if fleet_size <= lifecycle::FLEET_FLOOR {
        return lifecycle::OBSERVER_FLOOR_SECS;
    }
    if fleet_size >= lifecycle::FLEET_CEIL {
        return lifecycle::OBSERVER_CEIL_SECS;
    }
    let span = (lifecycle::OBSERVER_CEIL_SECS - lifecycle::OBSERVER_FLOOR_SECS) as u128;
    let over = (fleet_size - lifecycle::FLEET_FLOOR) as u128;
    let range = (lifecycle::FLEET_CEIL - lifecycle::FLEET_FLOOR) as u128;
    lifecycle::OBSERVER_FLOOR_SECS + (span * over / range) as u64
}

/// Entry fee for an observer period: 7 MB/s sustained for the whole period,
/// scaled by 1e8 for precision. Debited at registration and burned.
pub fn entry_fee(observer_duration: u64) -> Amount {
    Amount::from_u64(economics::ENTRY_FEE_MBPS)
        .mul_u64(observer_duration)
        .mul_u64(economics::CREDIT_SCALE)
}

/// Registration input from the candidate validator
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub id: Address,
    pub public_key: Vec<u8>,
    pub vrf_public_key: [u8; 32],
    pub network_asn: Option<u32>,
    pub ip: Option<String>,
}

/// All validator lifecycle transitions go through the registry; it reads and
/// writes validator records only through the state store.
pub struct ValidatorRegistry {
    state: Arc<StateStore>,
}

impl ValidatorRegistry {
    pub fn new(state: Arc<StateStore>) -> Self {
        Self { state }
    }

    /// Register a new observer. The entry fee is debited from the candidate's
    /// account and credited to no one; the debit and the validator record are
    /// committed atomically.
    pub fn register(&self, request: RegistrationRequest, now: u64) -> Result<ValidatorInfo> {
        if self.state.get_validator(&request.id).is_some() {
            return Err(ConsensusError::ValidatorAlreadyExists(request.id));
        }
        if Address::from_public_key(&request.public_key) != request.id {
            return Err(ConsensusError::InvalidOperation(
                "public key does not derive the validator id".to_string(),
            ));
        }

        let fleet_size = self.state.validator_count();
        let duration = observer_duration_secs(fleet_size.max(1));
        let fee = entry_fee(duration);

        let mut txn = self.state.begin();
        txn.debit(&request.id, &fee).map_err(|_| ConsensusError::InsufficientBalance)?;

        let mut info = ValidatorInfo::new_observer(
            request.id,
            request.public_key,
            request.vrf_public_key,
            now,
            duration,
        );
        info.network_asn = request.network_asn;
        info.ip = request.ip;
        txn.set_validator(info.clone())?;
        txn.commit()?;

        info!(
            validator = %info.id,
            observer_secs = duration,
            fee = %fee,
            "validator registered as observer"
        );
        Ok(info)
    }

    /// Promote observers whose period has elapsed and whose PoB score clears
    /// the activation threshold. Returns the newly activated ids.
    pub fn activate_pending(&self, now: u64) -> Result<Vec<Address>> {
        let mut activated = Vec::new();
        for mut info in self.state.validators_snapshot() {
            if !info.is_observer || info.is_suspended {
                continue;
            }
            if now.saturating_sub(info.observer_start) < info.observer_duration {
                continue;
            }
            if info.pob_score < pob::MIN_POB_SCORE {
                continue;
            }
            info.is_observer = false;
            info.is_active = true;
            self.state.put_validator(info.clone())?;
            info!(validator = %info.id, score = info.pob_score, "observer activated");
            activated.push(info.id);
        }
        Ok(activated)
    }

    /// Phase one of the exit: mark the validator as exiting. It stops voting
    /// and proposing immediately; removal happens after the exit delay.
    pub fn request_exit(&self, id: &Address, now: u64) -> Result<()> {
        let mut info =
            self.state.get_validator(id).ok_or(ConsensusError::ValidatorNotFound(*id))?;
        if info.exit_requested_at.is_some() {
            return Err(ConsensusError::InvalidOperation("exit already requested".to_string()));
        }
        info.exit_requested_at = Some(now);
        info.is_active = false;
        info.is_observer = false;
        self.state.put_validator(info)?;
        info!(validator = %id, "exit requested");
        Ok(())
    }

    /// Phase two: remove validators whose exit delay has elapsed
    pub fn process_exits(&self, now: u64) -> Result<Vec<Address>> {
        let mut removed = Vec::new();
        for info in self.state.validators_snapshot() {
            let Some(requested_at) = info.exit_requested_at else {
                continue;
            };
            if now.saturating_sub(requested_at) < lifecycle::EXIT_DELAY_SECS {
                continue;
            }
            self.state.remove_validator(&info.id)?;
            info!(validator = %info.id, "validator exited");
            removed.push(info.id);
        }
        Ok(removed)
    }

    /// Suspend a validator until `suspension_end`. Suspended validators can
    /// neither vote nor propose.
    pub fn suspend(&self, id: &Address, suspension_end: u64, reason: &str) -> Result<()> {
        let mut info =
            self.state.get_validator(id).ok_or(ConsensusError::ValidatorNotFound(*id))?;
        info.is_suspended = true;
        info.suspension_end = suspension_end;
        info.suspension_reason = Some(reason.to_string());
        self.state.put_validator(info)?;
        warn!(validator = %id, until = suspension_end, reason, "validator suspended");
        Ok(())
    }

    /// Clear suspensions whose end time has passed. Returns reinstated ids.
    pub fn sweep_suspensions(&self, now: u64) -> Result<Vec<Address>> {
        let mut reinstated = Vec::new();
        for mut info in self.state.validators_snapshot() {
            if !info.is_suspended || now <= info.suspension_end {
                continue;
            }
            info.is_suspended = false;
            info.suspension_end = 0;
            info.suspension_reason = None;
            self.state.put_validator(info.clone())?;
            info!(validator = %info.id, "suspension expired");
            reinstated.push(info.id);
        }
        Ok(reinstated)
    }

    /// Partition heuristic for the maintenance sweep: when a majority of the
    /// active set has not completed a PoB test within the stale window, the
    /// node is likely cut off from the fleet rather than the fleet being
    /// down. Returns true when a partition is suspected.
    pub fn partition_check(&self, now: u64, stale_after: u64) -> bool {
        let active = self.state.active_validators();
        if active.len() < 2 {
            return false;
        }
        let stale = active
            .iter()
            .filter(|v| now.saturating_sub(v.last_pob_test) > stale_after)
            .count();
        let suspected = stale * 2 > active.len();
        if suspected {
            warn!(stale, active = active.len(), "possible network partition");
        }
        suspected
    }

    /// Ingest a PoB measurement for a validator (fed by the external PoB
    /// test protocol).
    pub fn record_pob_sample(
        &self,
        id: &Address,
        pob_score: f64,
        upload_bandwidth: f64,
        latency_ms: f64,
        packet_loss_pct: f64,
        now: u64,
    ) -> Result<()> {
        let mut info =
            self.state.get_validator(id).ok_or(ConsensusError::ValidatorNotFound(*id))?;
        info.pob_score = pob_score.clamp(0.0, 1.0);
        info.upload_bandwidth = upload_bandwidth;
        info.latency_ms = latency_ms;
        info.packet_loss_pct = packet_loss_pct;
        info.last_pob_test = now;
        self.state.put_validator(info)?;
        Ok(())
    }
}
