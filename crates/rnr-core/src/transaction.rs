use crate::{Address, Amount, CoreError, Hash, Result};
use rnr_crypto::{sha256, verify_signature, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use serde::{Deserialize, Serialize};

/// Value transfer between two accounts.
///
/// The transaction id is the SHA-256 of the canonical encoding with the
/// signature blanked, so the id is stable before and after signing and is
/// exactly the message the sender signs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub fee: Amount,
    pub nonce: u64,
    pub timestamp: u64,
    /// Sender's 64-byte uncompressed P-256 public key; must derive `from`
    pub public_key: Vec<u8>,
    /// 64-byte r || s ECDSA signature, empty until signed
    pub signature: Vec<u8>,
    pub data: Vec<u8>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from: Address,
        to: Address,
        amount: Amount,
        fee: Amount,
        nonce: u64,
        timestamp: u64,
        public_key: Vec<u8>,
        data: Vec<u8>,
    ) -> Self {
        Self { from, to, amount, fee, nonce, timestamp, public_key, signature: Vec::new(), data }
    }

    /// Canonical encoding with the signature excluded. Field order and
    /// framing are fixed; every implementation must produce identical bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let amount = self.amount.to_decimal_string();
        let fee = self.fee.to_decimal_string();

        let mut data = Vec::with_capacity(128 + self.data.len());
        data.extend_from_slice(self.from.as_bytes());
        data.extend_from_slice(self.to.as_bytes());
        data.extend_from_slice(&(amount.len() as u32).to_be_bytes());
        data.extend_from_slice(amount.as_bytes());
        data.extend_from_slice(&(fee.len() as u32).to_be_bytes());
        data.extend_from_slice(fee.as_bytes());
        data.extend_from_slice(&self.nonce.to_be_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&(self.public_key.len() as u32).to_be_bytes());
        data.extend_from_slice(&self.public_key);
        data.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        data.extend_from_slice(&self.data);
        data
    }

    /// Transaction id: SHA-256 of the canonical, signature-blanked encoding
    pub fn id(&self) -> Hash {
        sha256(&self.canonical_bytes())
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id())
    }

    /// Sign with the sender's keypair. The signed message is the id hash.
    pub fn sign(&mut self, keypair: &rnr_crypto::KeyPair) {
        self.signature = keypair.sign(&self.id()).to_vec();
    }

    /// Verify the signature against the embedded sender public key and check
    /// that the key actually derives the `from` address.
    pub fn verify_signature(&self) -> Result<()> {
        if self.public_key.len() != PUBLIC_KEY_LEN {
            return Err(CoreError::InvalidTransaction(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LEN,
                self.public_key.len()
            )));
        }
        if self.signature.len() != SIGNATURE_LEN {
            return Err(CoreError::InvalidTransaction(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                self.signature.len()
            )));
        }
        if Address::from_public_key(&self.public_key) != self.from {
            return Err(CoreError::InvalidTransaction(
                "public key does not derive the sender address".to_string(),
            ));
        }

        let valid = verify_signature(&self.id(), &self.signature, &self.public_key)?;
        if !valid {
            return Err(CoreError::InvalidSignature);
        }
        Ok(())
    }

    /// Estimated wire size in bytes, used by the capacity-bounded selector
    pub fn estimated_size(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }

    /// The burned portion of the debit: `amount / 1e10`
    pub fn base_fee(&self) -> Amount {
        self.amount.div_u64(crate::constants::economics::BASE_FEE_DIVISOR)
    }
}
