use crate::poh::PohStamp;
use crate::{Address, CoreError, Hash, Result, Transaction};
use rnr_crypto::{merkle_root, sha256, verify_signature, SIGNATURE_LEN};
use serde::{Deserialize, Serialize};

/// Block header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub height: u64,
    /// Current PoB difficulty snapshot (min upload threshold, milli-MB/s)
    pub difficulty: u64,
    /// Proposer's PoB score in [0, 1]
    pub pob_score: f64,
    /// Fork-choice work unit: round(pob_score * 1000)
    pub pob_weight: u64,
    /// VRF proof over "block_{height}" under the proposer's VRF key
    pub vrf_proof: Vec<u8>,
    /// VRF output committed by the proposer
    pub vrf_output: Hash,
}

impl BlockHeader {
    pub fn pob_weight_from_score(score: f64) -> u64 {
        (score.clamp(0.0, 1.0) * 1000.0).round() as u64
    }
}

/// Block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub proposer_id: Address,
    pub poh_stamp: PohStamp,
    /// 64-byte proposer ECDSA signature, blanked during hashing
    pub signature: Vec<u8>,
}

impl Block {
    pub fn new(
        header: BlockHeader,
        transactions: Vec<Transaction>,
        proposer_id: Address,
        poh_stamp: PohStamp,
    ) -> Self {
        Self { header, transactions, proposer_id, poh_stamp, signature: Vec::new() }
    }

    /// Canonical encoding with the signature excluded, so the hash is stable
    /// before and after signing.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(256 + self.transactions.len() * 32);
        data.extend_from_slice(&self.header.version.to_be_bytes());
        data.extend_from_slice(&self.header.prev_hash);
        data.extend_from_slice(&self.header.merkle_root);
        data.extend_from_slice(&self.header.timestamp.to_be_bytes());
        data.extend_from_slice(&self.header.height.to_be_bytes());
        data.extend_from_slice(&self.header.difficulty.to_be_bytes());
        data.extend_from_slice(&self.header.pob_score.to_bits().to_be_bytes());
        data.extend_from_slice(&self.header.pob_weight.to_be_bytes());
        data.extend_from_slice(&(self.header.vrf_proof.len() as u32).to_be_bytes());
        data.extend_from_slice(&self.header.vrf_proof);
        data.extend_from_slice(&self.header.vrf_output);
        data.extend_from_slice(self.proposer_id.as_bytes());
        data.extend_from_slice(&self.poh_stamp.ordering_key());
        data.extend_from_slice(&(self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            data.extend_from_slice(&tx.id());
        }
        data
    }

    /// Block hash: SHA-256 of the canonical, signature-blanked encoding
    pub fn hash(&self) -> Hash {
        sha256(&self.canonical_bytes())
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Merkle root recomputed over the ids of the included transactions
    pub fn compute_merkle_root(&self) -> Hash {
        let leaves: Vec<Hash> = self.transactions.iter().map(|tx| tx.id()).collect();
        merkle_root(&leaves)
    }

    /// Sign with the proposer's keypair. The signed message is the block hash.
    pub fn sign(&mut self, keypair: &rnr_crypto::KeyPair) {
        self.signature = keypair.sign(&self.hash()).to_vec();
    }

    /// Verify the proposer's signature against the given public key
    pub fn verify_signature(&self, proposer_pubkey: &[u8]) -> Result<()> {
        if self.signature.len() != SIGNATURE_LEN {
            return Err(CoreError::InvalidBlock(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                self.signature.len()
            )));
        }
        let valid = verify_signature(&self.hash(), &self.signature, proposer_pubkey)?;
        if !valid {
            return Err(CoreError::InvalidBlock(
                "proposer signature does not verify".to_string(),
            ));
        }
        Ok(())
    }

    /// Structural checks that need no chain context
    pub fn validate_structure(&self) -> Result<()> {
        if self.header.merkle_root != self.compute_merkle_root() {
            return Err(CoreError::InvalidBlock("merkle root mismatch".to_string()));
        }
        if self.header.pob_weight != BlockHeader::pob_weight_from_score(self.header.pob_score) {
            return Err(CoreError::InvalidBlock("pob_weight does not match pob_score".to_string()));
        }
        if !(0.0..=1.0).contains(&self.header.pob_score) {
            return Err(CoreError::InvalidBlock(format!(
                "pob_score {} outside [0, 1]",
                self.header.pob_score
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for tx in &self.transactions {
            if !seen.insert(tx.id()) {
                return Err(CoreError::InvalidBlock(format!(
                    "duplicate transaction {}",
                    tx.id_hex()
                )));
            }
        }
        Ok(())
    }

    /// Create the genesis block
    pub fn genesis() -> Self {
        let header = BlockHeader {
            version: 1,
            prev_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            timestamp: 0,
            height: 0,
            difficulty: 7000,
            pob_score: 0.0,
            pob_weight: 0,
            vrf_proof: Vec::new(),
            vrf_output: [0u8; 32],
        };
        Self {
            header,
            transactions: vec![],
            proposer_id: Address::zero(),
            poh_stamp: PohStamp::genesis(),
            signature: Vec::new(),
        }
    }
}
