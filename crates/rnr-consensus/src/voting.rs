//! Per-block vote sessions with replay and double-vote defense.
//!
//! Every admission decision happens atomically under one mutex, in the order:
//! session exists and is open, voter is eligible, vote id is fresh, the
//! signature verifies, and the voter has not yet voted in this session.

use crate::error::{ConsensusError, Result};
use parking_lot::Mutex;
use rnr_core::constants::consensus::{
    PROPAGATION_PHASE_SECS, SUPERMAJORITY, VERIFICATION_VOTING_PHASE_SECS,
};
use rnr_core::{Address, Hash, ValidatorInfo};
use rnr_crypto::{sha256, verify_signature};
use rnr_storage::{keys, KvStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// A validator's vote on one block hash.
///
/// The vote id is `SHA-256(block_hash || validator_id)` and deliberately
/// excludes the signature: ECDSA signatures are re-randomizable, so an id
/// that covered the signature would let a validator re-sign the same vote
/// and slip past replay protection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vote {
    pub block_hash: Hash,
    pub validator_id: Address,
    pub signature: Vec<u8>,
    pub timestamp: u64,
    pub vote_id: Hash,
}

impl Vote {
    pub fn compute_id(block_hash: &Hash, validator_id: &Address) -> Hash {
        let mut data = Vec::with_capacity(52);
        data.extend_from_slice(block_hash);
        data.extend_from_slice(validator_id.as_bytes());
        sha256(&data)
    }

    /// Build and sign a vote; the signed message is the block hash
    pub fn signed(
        block_hash: Hash,
        validator_id: Address,
        keypair: &rnr_crypto::KeyPair,
        timestamp: u64,
    ) -> Self {
        Self {
            block_hash,
            validator_id,
            signature: keypair.sign(&block_hash).to_vec(),
            timestamp,
            vote_id: Self::compute_id(&block_hash, &validator_id),
        }
    }
}

/// Voting state for one proposed block
#[derive(Debug, Clone)]
pub struct VotingSession {
    pub block_hash: Hash,
    pub height: u64,
    pub votes: HashMap<Address, Vote>,
    pub total_validators: usize,
    pub required_votes: usize,
    pub deadline: u64,
    pub is_finalized: bool,
    pub finalized_at: Option<u64>,
}

impl VotingSession {
    fn new(block_hash: Hash, height: u64, total_validators: usize, now: u64) -> Self {
        Self {
            block_hash,
            height,
            votes: HashMap::new(),
            total_validators,
            required_votes: required_votes(total_validators),
            deadline: now + PROPAGATION_PHASE_SECS + VERIFICATION_VOTING_PHASE_SECS,
            is_finalized: false,
            finalized_at: None,
        }
    }
}

/// Supermajority threshold: ceil(0.85 * total)
pub fn required_votes(total_validators: usize) -> usize {
    (total_validators as f64 * SUPERMAJORITY).ceil() as usize
}

/// Result of a successfully recorded vote
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub finalized: bool,
    pub votes: usize,
    pub required: usize,
    /// Present when this vote revealed the validator voting for two
    /// different blocks at the same height: `hash1 || hash2` evidence.
    pub double_vote_evidence: Option<Vec<u8>>,
}

struct VotingInner {
    sessions: HashMap<Hash, VotingSession>,
    processed: HashSet<Hash>,
    /// (height, validator) -> first block hash voted at that height
    votes_by_height: HashMap<(u64, Address), Hash>,
}

/// Owns all voting sessions and the processed-vote-id set
pub struct VotingManager {
    kv: Arc<KvStore>,
    inner: Mutex<VotingInner>,
}

impl VotingManager {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self {
            kv,
            inner: Mutex::new(VotingInner {
                sessions: HashMap::new(),
                processed: HashSet::new(),
                votes_by_height: HashMap::new(),
            }),
        }
    }

    /// Reload processed vote ids from KV after a restart. Legacy votes whose
    /// stored id differs from the canonical `SHA-256(block || validator)`
    /// are migrated in place.
    pub fn recover(&self) -> Result<usize> {
        let entries = self.kv.prefix_iter(keys::VOTE_PREFIX)?;
        let mut inner = self.inner.lock();
        let mut recovered = 0usize;
        let mut migrated = 0usize;

        for (key, value) in entries {
            let mut vote: Vote = match bincode::deserialize(&value) {
                Ok(vote) => vote,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable vote record");
                    self.kv.delete(&key)?;
                    continue;
                }
            };

            let canonical = Vote::compute_id(&vote.block_hash, &vote.validator_id);
            if vote.vote_id != canonical || key != keys::vote(&canonical) {
                vote.vote_id = canonical;
                self.kv.delete(&key)?;
                self.kv.put(&keys::vote(&canonical), &bincode::serialize(&vote)?)?;
                migrated += 1;
            }

            inner.processed.insert(canonical);
            recovered += 1;
        }

        if migrated > 0 {
            info!(migrated, "migrated legacy vote ids to canonical form");
        }
        Ok(recovered)
    }

    /// Open a voting session for a freshly proposed block
    pub fn open_session(
        &self,
        block_hash: Hash,
        height: u64,
        total_validators: usize,
        now: u64,
    ) -> VotingSession {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .entry(block_hash)
            .or_insert_with(|| VotingSession::new(block_hash, height, total_validators, now));
        session.clone()
    }

    /// Admit a vote. All checks and the recording are atomic under the
    /// manager's mutex; the KV persist happens inside the same critical
    /// section so a crash cannot record a vote without persisting it.
    pub fn submit_vote(&self, vote: Vote, voter: &ValidatorInfo, now: u64) -> Result<VoteOutcome> {
        let mut inner = self.inner.lock();

        // 1. Session must exist and be open
        let session = inner
            .sessions
            .get(&vote.block_hash)
            .ok_or_else(|| ConsensusError::SessionNotFound(hex::encode(vote.block_hash)))?;
        if now > session.deadline {
            return Err(ConsensusError::DeadlineExceeded(hex::encode(vote.block_hash)));
        }
        let height = session.height;

        // 2. Voter must be active; observers cannot vote
        if voter.is_suspended {
            return Err(ConsensusError::SuspendedValidator(voter.id));
        }
        if !voter.can_vote() {
            return Err(ConsensusError::IneligibleVoter(voter.id));
        }

        // 3. Replay check on the canonical, signature-free id
        let canonical = Vote::compute_id(&vote.block_hash, &vote.validator_id);
        if inner.processed.contains(&canonical) {
            return Err(ConsensusError::ReplayDetected(hex::encode(canonical)));
        }

        // 4. Signature over the block hash under the voter's stored key
        let valid = verify_signature(&vote.block_hash, &vote.signature, &voter.public_key)
            .map_err(|_| ConsensusError::InvalidSignature)?;
        if !valid {
            return Err(ConsensusError::InvalidSignature);
        }

        // 5. Per-session double-vote check
        let session = inner.sessions.get_mut(&vote.block_hash).expect("checked above");
        if session.votes.contains_key(&vote.validator_id) {
            return Err(ConsensusError::DoubleVote {
                validator: vote.validator_id,
                block_hash: hex::encode(vote.block_hash),
            });
        }

        let mut recorded = vote.clone();
        recorded.vote_id = canonical;
        self.kv.put(&keys::vote(&canonical), &bincode::serialize(&recorded)?)?;

        session.votes.insert(recorded.validator_id, recorded.clone());
        let votes = session.votes.len();
        let required = session.required_votes;
        let finalized = if !session.is_finalized && votes >= required {
            session.is_finalized = true;
            session.finalized_at = Some(now);
            info!(
                block = %hex::encode(vote.block_hash),
                votes,
                required,
                "block reached supermajority"
            );
            true
        } else {
            session.is_finalized
        };

        inner.processed.insert(canonical);

        // Cross-session detection: the same validator voting two different
        // hashes at one height is slashable double voting.
        let prior = inner.votes_by_height.get(&(height, recorded.validator_id)).copied();
        let evidence = match prior {
            Some(first_hash) if first_hash != recorded.block_hash => {
                warn!(
                    validator = %recorded.validator_id,
                    height,
                    "double voting across block hashes detected"
                );
                let mut bytes = Vec::with_capacity(64);
                bytes.extend_from_slice(&first_hash);
                bytes.extend_from_slice(&recorded.block_hash);
                Some(bytes)
            }
            Some(_) => None,
            None => {
                inner.votes_by_height.insert((height, recorded.validator_id), recorded.block_hash);
                None
            }
        };

        Ok(VoteOutcome { finalized, votes, required, double_vote_evidence: evidence })
    }

    pub fn is_finalized(&self, block_hash: &Hash) -> bool {
        self.inner.lock().sessions.get(block_hash).map(|s| s.is_finalized).unwrap_or(false)
    }

    pub fn session(&self, block_hash: &Hash) -> Option<VotingSession> {
        self.inner.lock().sessions.get(block_hash).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Drop finalized sessions below `min_height` and their persisted votes.
    /// Votes are only cleaned once their session has finalized.
    pub fn cleanup(&self, min_height: u64) -> Result<usize> {
        let mut inner = self.inner.lock();
        let stale: Vec<Hash> = inner
            .sessions
            .values()
            .filter(|s| s.is_finalized && s.height < min_height)
            .map(|s| s.block_hash)
            .collect();

        for block_hash in &stale {
            if let Some(session) = inner.sessions.remove(block_hash) {
                for vote in session.votes.values() {
                    self.kv.delete(&keys::vote(&vote.vote_id))?;
                    inner.processed.remove(&vote.vote_id);
                }
            }
        }
        inner.votes_by_height.retain(|(height, _), _| *height >= min_height);
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rnr_crypto::KeyPair;
    use tempfile::TempDir;

    fn active_validator(keypair: &KeyPair) -> ValidatorInfo {
        let mut info = ValidatorInfo::new_observer(
            Address::new(keypair.address()),
            keypair.public_key_bytes().to_vec(),
            [0u8; 32],
            0,
            3600,
        );
        info.is_observer = false;
        info.is_active = true;
        info
    }

    fn manager() -> (TempDir, VotingManager) {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        (dir, VotingManager::new(kv))
    }

    #[test]
    fn test_required_votes_rounds_up() {
        assert_eq!(required_votes(1), 1);
        assert_eq!(required_votes(3), 3);
        assert_eq!(required_votes(10), 9);
        assert_eq!(required_votes(20), 17);
        assert_eq!(required_votes(100), 85);
    }

    #[test]
    fn test_single_voter_finalizes() {
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let voter = active_validator(&keypair);
        let block_hash = [1u8; 32];

        manager.open_session(block_hash, 1, 1, 100);
        let vote = Vote::signed(block_hash, voter.id, &keypair, 100);
        let outcome = manager.submit_vote(vote, &voter, 101).unwrap();

        assert!(outcome.finalized);
        assert_eq!(outcome.votes, 1);
        assert!(manager.is_finalized(&block_hash));
    }

    #[test]
    fn test_replay_with_fresh_signature_rejected() {
        // Re-signing the same (block, validator) pair must not bypass replay
        // protection: the vote id excludes the signature on purpose.
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let voter = active_validator(&keypair);
        let block_hash = [1u8; 32];

        manager.open_session(block_hash, 1, 1, 100);
        let vote = Vote::signed(block_hash, voter.id, &keypair, 100);
        manager.submit_vote(vote, &voter, 101).unwrap();

        let mut replay = Vote::signed(block_hash, voter.id, &keypair, 102);
        replay.signature = keypair.sign_randomized(&block_hash).to_vec();
        let result = manager.submit_vote(replay, &voter, 102);

        assert!(matches!(
            result,
            Err(ConsensusError::ReplayDetected(_)) | Err(ConsensusError::DoubleVote { .. })
        ));
        assert_eq!(manager.session(&block_hash).unwrap().votes.len(), 1);
    }

    #[test]
    fn test_observer_cannot_vote() {
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let mut voter = active_validator(&keypair);
        voter.is_observer = true;
        voter.is_active = false;
        let block_hash = [1u8; 32];

        manager.open_session(block_hash, 1, 1, 100);
        let vote = Vote::signed(block_hash, voter.id, &keypair, 100);
        assert!(matches!(
            manager.submit_vote(vote, &voter, 101),
            Err(ConsensusError::IneligibleVoter(_))
        ));
    }

    #[test]
    fn test_suspended_voter_rejected() {
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let mut voter = active_validator(&keypair);
        voter.is_suspended = true;
        let block_hash = [1u8; 32];

        manager.open_session(block_hash, 1, 1, 100);
        let vote = Vote::signed(block_hash, voter.id, &keypair, 100);
        assert!(matches!(
            manager.submit_vote(vote, &voter, 101),
            Err(ConsensusError::SuspendedValidator(_))
        ));
    }

    #[test]
    fn test_deadline_closes_session() {
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let voter = active_validator(&keypair);
        let block_hash = [1u8; 32];

        manager.open_session(block_hash, 1, 1, 100);
        let vote = Vote::signed(block_hash, voter.id, &keypair, 100);
        let too_late = 100 + PROPAGATION_PHASE_SECS + VERIFICATION_VOTING_PHASE_SECS + 1;
        assert!(matches!(
            manager.submit_vote(vote, &voter, too_late),
            Err(ConsensusError::DeadlineExceeded(_))
        ));
    }

    #[test]
    fn test_bad_signature_rejected() {
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let voter = active_validator(&keypair);
        let block_hash = [1u8; 32];

        manager.open_session(block_hash, 1, 1, 100);
        // Signed by the wrong key
        let vote = Vote::signed(block_hash, voter.id, &other, 100);
        assert!(matches!(
            manager.submit_vote(vote, &voter, 101),
            Err(ConsensusError::InvalidSignature)
        ));
    }

    #[test]
    fn test_unknown_session_rejected() {
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let voter = active_validator(&keypair);
        let vote = Vote::signed([9u8; 32], voter.id, &keypair, 100);
        assert!(matches!(
            manager.submit_vote(vote, &voter, 101),
            Err(ConsensusError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_double_vote_across_hashes_produces_evidence() {
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let voter = active_validator(&keypair);
        let hash_a = [1u8; 32];
        let hash_b = [2u8; 32];

        // Two competing sessions at the same height
        manager.open_session(hash_a, 5, 3, 100);
        manager.open_session(hash_b, 5, 3, 100);

        let first = Vote::signed(hash_a, voter.id, &keypair, 100);
        let outcome = manager.submit_vote(first, &voter, 101).unwrap();
        assert!(outcome.double_vote_evidence.is_none());

        let second = Vote::signed(hash_b, voter.id, &keypair, 102);
        let outcome = manager.submit_vote(second, &voter, 102).unwrap();
        let evidence = outcome.double_vote_evidence.unwrap();
        assert_eq!(evidence.len(), 64);
        assert_eq!(&evidence[..32], &hash_a);
        assert_eq!(&evidence[32..], &hash_b);
    }

    #[test]
    fn test_votes_persist_and_recover() {
        let dir = TempDir::new().unwrap();
        let keypair = KeyPair::generate();
        let voter = active_validator(&keypair);
        let block_hash = [1u8; 32];
        let canonical = Vote::compute_id(&block_hash, &voter.id);

        {
            let kv = Arc::new(KvStore::open(dir.path()).unwrap());
            let manager = VotingManager::new(kv);
            manager.open_session(block_hash, 1, 1, 100);
            let vote = Vote::signed(block_hash, voter.id, &keypair, 100);
            manager.submit_vote(vote, &voter, 101).unwrap();
        }

        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        let manager = VotingManager::new(kv);
        assert_eq!(manager.recover().unwrap(), 1);

        // The recovered id still blocks replays in a fresh session
        manager.open_session(block_hash, 1, 1, 200);
        let replay = Vote::signed(block_hash, voter.id, &keypair, 200);
        assert!(matches!(
            manager.submit_vote(replay, &voter, 201),
            Err(ConsensusError::ReplayDetected(id)) if id == hex::encode(canonical)
        ));
    }

    #[test]
    fn test_recover_migrates_legacy_vote_ids() {
        let dir = TempDir::new().unwrap();
        let keypair = KeyPair::generate();
        let voter = active_validator(&keypair);
        let block_hash = [1u8; 32];

        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        // A legacy record stored under a non-canonical id
        let legacy_id = [0xee; 32];
        let legacy = Vote {
            block_hash,
            validator_id: voter.id,
            signature: keypair.sign(&block_hash).to_vec(),
            timestamp: 50,
            vote_id: legacy_id,
        };
        kv.put(&keys::vote(&legacy_id), &bincode::serialize(&legacy).unwrap()).unwrap();

        let manager = VotingManager::new(kv.clone());
        assert_eq!(manager.recover().unwrap(), 1);

        let canonical = Vote::compute_id(&block_hash, &voter.id);
        assert!(kv.get(&keys::vote(&legacy_id)).unwrap().is_none());
        let stored: Vote =
            bincode::deserialize(&kv.get(&keys::vote(&canonical)).unwrap().unwrap()).unwrap();
        assert_eq!(stored.vote_id, canonical);
    }

    #[test]
    fn test_cleanup_removes_only_finalized_sessions() {
        let (_dir, manager) = manager();
        let keypair = KeyPair::generate();
        let voter = active_validator(&keypair);

        let finalized_hash = [1u8; 32];
        manager.open_session(finalized_hash, 1, 1, 100);
        let vote = Vote::signed(finalized_hash, voter.id, &keypair, 100);
        manager.submit_vote(vote, &voter, 101).unwrap();

        let open_hash = [2u8; 32];
        manager.open_session(open_hash, 2, 5, 100);

        assert_eq!(manager.cleanup(10).unwrap(), 1);
        assert!(manager.session(&finalized_hash).is_none());
        assert!(manager.session(&open_hash).is_some());
    }
}
