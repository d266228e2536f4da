use rnr_core::{Address, Amount, ValidatorInfo};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Genesis description loaded at first startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: u64,
    pub network_name: String,
    #[serde(default)]
    pub initial_validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub initial_balances: Vec<GenesisBalance>,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub id: Address,
    /// 64-byte ECDSA public key, hex
    pub public_key: String,
    /// 32-byte VRF public key, hex
    pub vrf_public_key: String,
    pub pob_score: f64,
    pub upload_bandwidth: f64,
    #[serde(default)]
    pub network_asn: Option<u32>,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub address: Address,
    pub balance: Amount,
}

impl GenesisConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let genesis: GenesisConfig = serde_json::from_str(&contents)?;
        genesis.validate()?;
        Ok(genesis)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network_name.is_empty() {
            anyhow::bail!("network_name must not be empty");
        }
        for validator in &self.initial_validators {
            if hex::decode(&validator.public_key).map(|b| b.len()) != Ok(64) {
                anyhow::bail!("validator {} public_key must be 64 hex bytes", validator.id);
            }
            if hex::decode(&validator.vrf_public_key).map(|b| b.len()) != Ok(32) {
                anyhow::bail!("validator {} vrf_public_key must be 32 hex bytes", validator.id);
            }
            if !(0.0..=1.0).contains(&validator.pob_score) {
                anyhow::bail!("validator {} pob_score outside [0, 1]", validator.id);
            }
        }
        Ok(())
    }

    /// Materialize an initial validator as an already-active record
    pub fn validator_info(validator: &GenesisValidator) -> ValidatorInfo {
        let public_key = hex::decode(&validator.public_key).expect("validated at load");
        let vrf_bytes = hex::decode(&validator.vrf_public_key).expect("validated at load");
        let mut vrf_public_key = [0u8; 32];
        vrf_public_key.copy_from_slice(&vrf_bytes);

        let mut info = ValidatorInfo::new_observer(validator.id, public_key, vrf_public_key, 0, 0);
        info.is_observer = false;
        info.is_active = true;
        info.pob_score = validator.pob_score;
        info.upload_bandwidth = validator.upload_bandwidth;
        info.network_asn = validator.network_asn;
        info.ip = validator.ip.clone();
        info
    }

    /// A single-node development genesis
    pub fn dev(chain_id: u64) -> Self {
        Self {
            chain_id,
            network_name: "rnr-dev".to_string(),
            initial_validators: vec![],
            initial_balances: vec![],
            bootstrap_peers: vec![],
        }
    }
}
