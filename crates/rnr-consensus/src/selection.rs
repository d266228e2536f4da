//! PoB-weighted deterministic proposer selection and the VRF eligibility
//! binding that lets peers check a proposer's claim independently.

use crate::error::{ConsensusError, Result};
use num_bigint::BigUint;
use rnr_core::block::BlockHeader;
use rnr_core::{Address, Hash, ValidatorInfo};
use rnr_crypto::{sha256, vrf_output_to_unit, vrf_verify, VrfProof};

/// Snapshot of one eligible validator, taken under the state lock before
/// selection runs. Selection is a pure function of these snapshots.
#[derive(Debug, Clone)]
pub struct EligibleValidator {
    pub id: Address,
    pub public_key: Vec<u8>,
    pub vrf_public_key: [u8; 32],
    pub pob_score: f64,
}

impl From<&ValidatorInfo> for EligibleValidator {
    fn from(info: &ValidatorInfo) -> Self {
        Self {
            id: info.id,
            public_key: info.public_key.clone(),
            vrf_public_key: info.vrf_public_key,
            pob_score: info.pob_score,
        }
    }
}

/// Selection seed: previous block hash concatenated with the big-endian height
pub fn selection_seed(prev_hash: &Hash, height: u64) -> Vec<u8> {
    let mut seed = Vec::with_capacity(40);
    seed.extend_from_slice(prev_hash);
    seed.extend_from_slice(&height.to_be_bytes());
    seed
}

/// VRF input for a given height
pub fn vrf_alpha(height: u64) -> Vec<u8> {
    format!("block_{height}").into_bytes()
}

fn effective_score(score: f64) -> f64 {
    if score == 0.0 {
        0.5
    } else {
        score
    }
}

/// Weight factor applied to a validator's selection hash. Better PoB scores
/// shrink the factor; scores below 0.1 are penalized outright.
fn weight_factor(score: f64) -> f64 {
    let s = effective_score(score);
    if s < 0.1 {
        10.0
    } else {
        2.0 - s
    }
}

/// Millionths-scaled integer weight, so the weighted hash comparison is
/// exact big-integer arithmetic with no float rounding across platforms.
fn weight_millionths(score: f64) -> u64 {
    (weight_factor(score) * 1_000_000.0).round() as u64
}

/// Pick the proposer for (seed, eligible set): for each validator compute
/// `h(v) = SHA-256(seed || id || pubkey)` and take the minimum of
/// `h(v) * weight(v)` as an arbitrary-precision integer. Ties break on the
/// lexicographically smaller id. Identical inputs always yield the same
/// winner.
pub fn select_proposer(seed: &[u8], eligible: &[EligibleValidator]) -> Result<Address> {
    if eligible.is_empty() {
        return Err(ConsensusError::NoEligibleValidators);
    }

    let mut best: Option<(BigUint, Address)> = None;
    for validator in eligible {
        let mut data = Vec::with_capacity(seed.len() + 20 + validator.public_key.len());
        data.extend_from_slice(seed);
        data.extend_from_slice(validator.id.as_bytes());
        data.extend_from_slice(&validator.public_key);
        let h = sha256(&data);

        let weighted =
            BigUint::from_bytes_be(&h) * BigUint::from(weight_millionths(validator.pob_score));

        let better = match &best {
            None => true,
            Some((current, current_id)) => {
                weighted < *current || (weighted == *current && validator.id < *current_id)
            }
        };
        if better {
            best = Some((weighted, validator.id));
        }
    }

    Ok(best.expect("non-empty eligible set").1)
}

/// Verify a block's VRF binding: the proof must verify under the proposer's
/// VRF key for input `"block_{height}"`, the committed output must match,
/// and the output mapped to [0, 1) must land inside the proposer's weighted
/// slice of the active set's total PoB score.
pub fn verify_proposer_eligibility(
    header: &BlockHeader,
    proposer_id: &Address,
    active: &[EligibleValidator],
) -> Result<()> {
    let proposer = active
        .iter()
        .find(|v| v.id == *proposer_id)
        .ok_or_else(|| ConsensusError::InvalidVrf("proposer not in active set".to_string()))?;

    let proof = VrfProof::from_bytes(&header.vrf_proof)
        .ok_or_else(|| ConsensusError::InvalidVrf("malformed proof bytes".to_string()))?;

    let alpha = vrf_alpha(header.height);
    if !vrf_verify(&proposer.vrf_public_key, &alpha, &header.vrf_output, &proof) {
        return Err(ConsensusError::InvalidVrf("proof does not verify".to_string()));
    }

    let (lo, hi) = proposer_slice(proposer_id, active);
    let unit = vrf_output_to_unit(&header.vrf_output);
    if !(unit >= lo && unit < hi) {
        return Err(ConsensusError::InvalidVrf(format!(
            "output {unit:.4} outside proposer slice [{lo:.4}, {hi:.4})"
        )));
    }
    Ok(())
}

/// The proposer's half-open [lo, hi) interval of the unit line, proportional
/// to its effective PoB score over the active set's total. Validators are
/// walked in id order so every node computes the same slices.
fn proposer_slice(proposer_id: &Address, active: &[EligibleValidator]) -> (f64, f64) {
    let mut sorted: Vec<&EligibleValidator> = active.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let total: f64 = sorted.iter().map(|v| effective_score(v.pob_score)).sum();
    if total <= 0.0 {
        return (0.0, 1.0);
    }

    let mut cumulative = 0.0;
    for validator in sorted {
        let share = effective_score(validator.pob_score) / total;
        if validator.id == *proposer_id {
            return (cumulative, cumulative + share);
        }
        cumulative += share;
    }
    (0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rnr_crypto::VrfKeypair;

    fn validator(tag: u8, score: f64) -> EligibleValidator {
        let mut id = [0u8; 20];
        id[0] = tag;
        let mut pubkey = vec![0u8; 64];
        pubkey[0] = tag;
        EligibleValidator {
            id: Address::new(id),
            public_key: pubkey,
            vrf_public_key: [tag; 32],
            pob_score: score,
        }
    }

    #[test]
    fn test_empty_set_fails() {
        let seed = selection_seed(&[0u8; 32], 1);
        assert!(matches!(
            select_proposer(&seed, &[]),
            Err(ConsensusError::NoEligibleValidators)
        ));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let seed = selection_seed(&[0u8; 32], 1);
        let set = vec![validator(1, 1.0), validator(2, 0.5), validator(3, 0.1)];

        let first = select_proposer(&seed, &set).unwrap();
        for _ in 0..1000 {
            assert_eq!(select_proposer(&seed, &set).unwrap(), first);
        }
    }

    #[test]
    fn test_selection_independent_of_input_order() {
        let seed = selection_seed(&[7u8; 32], 42);
        let set = vec![validator(1, 0.9), validator(2, 0.95), validator(3, 0.85)];
        let mut reversed = set.clone();
        reversed.reverse();
        assert_eq!(
            select_proposer(&seed, &set).unwrap(),
            select_proposer(&seed, &reversed).unwrap()
        );
    }

    #[test]
    fn test_high_score_wins_majority_of_seeds() {
        // v1 pob=1.0, v2 pob=0.5, v3 pob=0.1: v1's lower weight factor must
        // win more than half of a large seed sample.
        let set = vec![validator(1, 1.0), validator(2, 0.5), validator(3, 0.1)];
        let v1 = set[0].id;

        const ROUNDS: u64 = 5000;
        let mut wins = 0;
        for round in 0..ROUNDS {
            let prev = sha256(&round.to_be_bytes());
            let seed = selection_seed(&prev, round);
            if select_proposer(&seed, &set).unwrap() == v1 {
                wins += 1;
            }
        }
        assert!(wins > ROUNDS / 2, "v1 won only {wins}/{ROUNDS}");
    }

    #[test]
    fn test_low_scores_are_penalized() {
        // A 0.05-score validator carries a 10x weight factor and should very
        // rarely beat a healthy one.
        let set = vec![validator(1, 0.95), validator(2, 0.05)];
        let weak = set[1].id;

        let mut weak_wins = 0;
        for round in 0u64..500 {
            let prev = sha256(&round.to_be_bytes());
            let seed = selection_seed(&prev, round);
            if select_proposer(&seed, &set).unwrap() == weak {
                weak_wins += 1;
            }
        }
        assert!(weak_wins < 100, "weak validator won {weak_wins}/500");
    }

    #[test]
    fn test_zero_score_treated_as_half() {
        assert_eq!(weight_millionths(0.0), weight_millionths(0.5));
    }

    #[test]
    fn test_seed_binds_height_and_hash() {
        assert_ne!(selection_seed(&[0u8; 32], 1), selection_seed(&[0u8; 32], 2));
        assert_ne!(selection_seed(&[0u8; 32], 1), selection_seed(&[1u8; 32], 1));
    }

    fn header_with_vrf(height: u64, vrf: &VrfKeypair) -> BlockHeader {
        let (output, proof) = vrf.prove(&vrf_alpha(height));
        BlockHeader {
            version: 1,
            prev_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            timestamp: 0,
            height,
            difficulty: 7000,
            pob_score: 0.9,
            pob_weight: 900,
            vrf_proof: proof.to_bytes().to_vec(),
            vrf_output: output,
        }
    }

    #[test]
    fn test_eligibility_accepts_sole_validator() {
        // A sole validator owns the whole unit line, so any output passes the
        // range check and only the proof itself is load-bearing.
        let vrf = VrfKeypair::generate();
        let mut v = validator(1, 0.9);
        v.vrf_public_key = vrf.public_key();

        let header = header_with_vrf(5, &vrf);
        assert!(verify_proposer_eligibility(&header, &v.id, &[v.clone()]).is_ok());
    }

    #[test]
    fn test_eligibility_rejects_unknown_proposer() {
        let vrf = VrfKeypair::generate();
        let v = validator(1, 0.9);
        let header = header_with_vrf(5, &vrf);
        let stranger = validator(9, 0.9).id;
        assert!(verify_proposer_eligibility(&header, &stranger, &[v]).is_err());
    }

    #[test]
    fn test_eligibility_rejects_tampered_output() {
        let vrf = VrfKeypair::generate();
        let mut v = validator(1, 0.9);
        v.vrf_public_key = vrf.public_key();

        let mut header = header_with_vrf(5, &vrf);
        header.vrf_output[0] ^= 0x01;
        assert!(matches!(
            verify_proposer_eligibility(&header, &v.id, &[v.clone()]),
            Err(ConsensusError::InvalidVrf(_))
        ));
    }

    #[test]
    fn test_eligibility_rejects_foreign_proof() {
        let vrf = VrfKeypair::generate();
        let other = VrfKeypair::generate();
        let mut v = validator(1, 0.9);
        v.vrf_public_key = vrf.public_key();

        // Proof generated under a different key
        let header = header_with_vrf(5, &other);
        assert!(verify_proposer_eligibility(&header, &v.id, &[v.clone()]).is_err());
    }

    #[test]
    fn test_proposer_slices_partition_unit_line() {
        let set = vec![validator(1, 0.8), validator(2, 0.8), validator(3, 0.8)];
        let (lo1, hi1) = proposer_slice(&set[0].id, &set);
        let (lo2, hi2) = proposer_slice(&set[1].id, &set);
        let (lo3, hi3) = proposer_slice(&set[2].id, &set);

        assert_eq!(lo1, 0.0);
        assert!((hi1 - lo2).abs() < 1e-9);
        assert!((hi2 - lo3).abs() < 1e-9);
        assert!((hi3 - 1.0).abs() < 1e-9);
    }
}
