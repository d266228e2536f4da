//! Verifiable random function used for proposer eligibility.
//!
//! The construction is signature-backed: the proof is the deterministic
//! Ed25519 signature over the input, and the output is SHA-256 of the proof.
//! Anyone holding the public key can recompute and check the output; nobody
//! without the secret key can forge a proof. The scheme is swappable behind
//! the three-call interface: `keypair` / `prove` / `verify`.

use crate::hash::{sha256, Hash};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// VRF output hash type (32 bytes)
pub type VrfOutput = Hash;

/// VRF proof length: one Ed25519 signature
pub const VRF_PROOF_LEN: usize = 64;

/// VRF proof bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrfProof(pub [u8; VRF_PROOF_LEN]);

impl VrfProof {
    pub fn to_bytes(&self) -> [u8; VRF_PROOF_LEN] {
        self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; VRF_PROOF_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

/// VRF keypair for proving; verification needs only the public key
pub struct VrfKeypair {
    signing_key: SigningKey,
}

impl VrfKeypair {
    /// Generate a new random VRF keypair
    pub fn generate() -> Self {
        Self { signing_key: SigningKey::generate(&mut OsRng) }
    }

    /// Deterministic keypair from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self { signing_key: SigningKey::from_bytes(seed) }
    }

    /// 32-byte public key for on-chain broadcast
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Raw secret seed bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Prove: generate (output, proof) for a given input.
    ///
    /// Ed25519 signing is deterministic, so the same (key, alpha) always
    /// yields the same proof and output.
    pub fn prove(&self, alpha: &[u8]) -> (VrfOutput, VrfProof) {
        let sig = self.signing_key.sign(alpha);
        let proof = VrfProof(sig.to_bytes());
        (sha256(&proof.0), proof)
    }
}

/// Verify a VRF proof against a public key, input, and claimed output.
///
/// Returns false when the proof does not verify under the key, when the
/// output does not match the proof, or when the key bytes are invalid.
pub fn vrf_verify(
    public_key: &[u8; 32],
    alpha: &[u8],
    output: &VrfOutput,
    proof: &VrfProof,
) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = Signature::from_bytes(&proof.0);
    if vk.verify(alpha, &sig).is_err() {
        return false;
    }
    sha256(&proof.0) == *output
}

/// Map a VRF output to [0, 1) using its first byte
pub fn vrf_output_to_unit(output: &VrfOutput) -> f64 {
    output[0] as f64 / 256.0
}
