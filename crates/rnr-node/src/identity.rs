use anyhow::Context;
use rnr_core::Address;
use rnr_crypto::{sha256, KeyPair, VrfKeypair};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// The node's signing identity: an ECDSA keypair for blocks and votes and a
/// VRF keypair for eligibility proofs. Loaded from a password-checked wallet
/// file, or generated ephemerally for development runs.
pub struct ValidatorIdentity {
    pub keypair: KeyPair,
    pub vrf: VrfKeypair,
    pub id: Address,
}

#[derive(Serialize, Deserialize)]
struct WalletFile {
    version: u32,
    /// hex(SHA-256("rnr-wallet" || password)); password sanity check only,
    /// full keystore encryption lives in the external wallet tooling
    check: String,
    secret_key: String,
    vrf_secret_key: String,
}

const WALLET_CHECK_DOMAIN: &[u8] = b"rnr-wallet";

fn password_check(password: &str) -> String {
    let mut data = Vec::with_capacity(WALLET_CHECK_DOMAIN.len() + password.len());
    data.extend_from_slice(WALLET_CHECK_DOMAIN);
    data.extend_from_slice(password.as_bytes());
    hex::encode(sha256(&data))
}

impl ValidatorIdentity {
    /// Generate a fresh in-memory identity (dev mode)
    pub fn ephemeral() -> Self {
        let keypair = KeyPair::generate();
        let vrf = VrfKeypair::generate();
        let id = Address::new(keypair.address());
        Self { keypair, vrf, id }
    }

    /// Load from a wallet file, verifying the password
    pub fn load<P: AsRef<Path>>(path: P, password: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading wallet {}", path.as_ref().display()))?;
        let wallet: WalletFile = serde_json::from_str(&contents).context("parsing wallet")?;

        if wallet.check != password_check(password) {
            anyhow::bail!("wallet password mismatch");
        }

        let secret = hex::decode(&wallet.secret_key).context("wallet secret_key hex")?;
        let keypair = KeyPair::from_secret_bytes(&secret)
            .map_err(|e| anyhow::anyhow!("wallet secret key invalid: {e}"))?;

        let vrf_secret: [u8; 32] = hex::decode(&wallet.vrf_secret_key)
            .context("wallet vrf_secret_key hex")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("vrf secret key must be 32 bytes"))?;
        let vrf = VrfKeypair::from_seed(&vrf_secret);

        let id = Address::new(keypair.address());
        info!(validator = %id, "validator identity loaded from wallet");
        Ok(Self { keypair, vrf, id })
    }

    /// Write a wallet file for this identity
    pub fn save<P: AsRef<Path>>(&self, path: P, password: &str) -> anyhow::Result<()> {
        let wallet = WalletFile {
            version: 1,
            check: password_check(password),
            secret_key: hex::encode(self.keypair.secret_bytes()),
            vrf_secret_key: hex::encode(self.vrf.secret_bytes()),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&wallet)?)?;
        Ok(())
    }

    /// Load the configured wallet, or fall back to an ephemeral identity
    pub fn load_or_ephemeral(
        wallet_file: Option<&Path>,
        wallet_password: Option<&str>,
    ) -> anyhow::Result<Self> {
        match (wallet_file, wallet_password) {
            (Some(path), Some(password)) => Self::load(path, password),
            _ => {
                warn!("no wallet configured, generating an ephemeral dev identity");
                Ok(Self::ephemeral())
            }
        }
    }
}
