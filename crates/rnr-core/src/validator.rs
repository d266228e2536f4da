use crate::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Validator record.
///
/// Lifecycle: registered observers wait out their observer period, activate
/// once their PoB score clears the threshold, may be suspended by slashing,
/// and leave through a two-phase exit. Exactly one of observer / active /
/// suspended / exited holds at any time; `can_vote` and `can_propose` encode
/// the consensus-facing view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorInfo {
    pub id: Address,
    /// 64-byte uncompressed P-256 public key
    pub public_key: Vec<u8>,
    /// 32-byte Ed25519 VRF public key
    pub vrf_public_key: [u8; 32],
    /// Measured PoB score in [0, 1]
    pub pob_score: f64,
    /// Measured upload bandwidth (MB/s)
    pub upload_bandwidth: f64,
    /// Measured round-trip latency (ms)
    pub latency_ms: f64,
    /// Measured packet loss (%)
    pub packet_loss_pct: f64,
    /// Reputation score, 0-100
    pub reputation: u8,
    /// Unix time of the last PoB measurement
    pub last_pob_test: u64,
    pub is_active: bool,
    pub is_observer: bool,
    pub is_suspended: bool,
    pub suspension_end: u64,
    pub suspension_reason: Option<String>,
    pub network_asn: Option<u32>,
    pub ip: Option<String>,
    pub observer_start: u64,
    pub observer_duration: u64,
    pub exit_requested_at: Option<u64>,
}

impl ValidatorInfo {
    pub fn new_observer(
        id: Address,
        public_key: Vec<u8>,
        vrf_public_key: [u8; 32],
        observer_start: u64,
        observer_duration: u64,
    ) -> Self {
        Self {
            id,
            public_key,
            vrf_public_key,
            pob_score: 0.0,
            upload_bandwidth: 0.0,
            latency_ms: 0.0,
            packet_loss_pct: 0.0,
            reputation: 50,
            last_pob_test: 0,
            is_active: false,
            is_observer: true,
            is_suspended: false,
            suspension_end: 0,
            suspension_reason: None,
            network_asn: None,
            ip: None,
            observer_start,
            observer_duration,
            exit_requested_at: None,
        }
    }

    /// PoB score with the zero sentinel mapped to the neutral 0.5
    pub fn effective_pob_score(&self) -> f64 {
        if self.pob_score == 0.0 {
            0.5
        } else {
            self.pob_score
        }
    }

    /// Eligible to cast votes: active, not suspended, not an observer
    pub fn can_vote(&self) -> bool {
        self.is_active && !self.is_suspended && !self.is_observer
    }

    /// Eligible for proposer selection
    pub fn can_propose(&self) -> bool {
        self.can_vote()
    }

    /// Network group for reward fairness: AS number when known, else the /24
    /// of the reported IP, else "unknown".
    pub fn network_group(&self) -> String {
        if let Some(asn) = self.network_asn {
            return format!("as{asn}");
        }
        if let Some(ip) = &self.ip {
            if let Some(subnet) = slash24(ip) {
                return subnet;
            }
        }
        "unknown".to_string()
    }

    /// Hash of this validator's VRF public key, usable as a per-validator seed
    pub fn vrf_key_hash(&self) -> Hash {
        rnr_crypto::sha256(&self.vrf_public_key)
    }
}

fn slash24(ip: &str) -> Option<String> {
    let addr: std::net::Ipv4Addr = ip.parse().ok()?;
    let octets = addr.octets();
    Some(format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2]))
}
