//! # Route-N-Root Cryptography
//!
//! Cryptographic primitives for the Route-N-Root chain:
//! - SHA-256 hashing
//! - ECDSA signatures over P-256 (blocks, transactions, votes)
//! - Merkle roots over transaction ids
//! - Ed25519-backed VRF for proposer eligibility proofs

pub mod error;
pub mod hash;
pub mod merkle;
pub mod signature;
pub mod vrf;

pub use error::{CryptoError, Result};
pub use hash::{sha256, Hash};
pub use merkle::merkle_root;
pub use signature::{
    address_from_public_key, verify_signature, KeyPair, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};
pub use vrf::{vrf_output_to_unit, vrf_verify, VrfKeypair, VrfOutput, VrfProof, VRF_PROOF_LEN};
