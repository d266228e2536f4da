//! Per-block reward distribution. The proposer takes 80% of the block reward
//! plus the block's net fees; the remaining 20% is shared with PoB
//! contributors grouped by network so one operator cannot multiply its share
//! by spinning up many nodes on the same network.

use crate::error::Result;
use rnr_core::constants::economics;
use rnr_core::{Address, Amount, ValidatorInfo};
use rnr_storage::StateTransaction;
use std::collections::BTreeMap;
use tracing::debug;

/// Block reward in credits: starts at 100 and decays by one credit per
/// million blocks, floored at 1.
pub fn block_reward_credits(height: u64) -> u64 {
    economics::INITIAL_REWARD_CREDITS
        .saturating_sub(height / economics::REWARD_DECAY_BLOCKS)
        .max(1)
}

/// What was credited where, for logging and tests
#[derive(Debug, Clone)]
pub struct RewardBreakdown {
    pub proposer: Address,
    pub proposer_credit: Amount,
    pub pob_pool: Amount,
    pub groups: usize,
    pub contributors_paid: usize,
    pub skipped_suspended: usize,
}

/// Stage the reward credits for one finalized block into an open state
/// transaction.
///
/// Contributors are the active validators grouped by network (AS number,
/// else /24 subnet, else "unknown"). The pool splits equally across groups,
/// then equally within each group. Suspended members still occupy their
/// slice but are skipped at credit time; their share is burned, not
/// redistributed. Integer-division remainders are likewise burned.
pub fn stage_block_rewards(
    txn: &mut StateTransaction<'_>,
    height: u64,
    proposer: &Address,
    fee_pool: &Amount,
    contributors: &[ValidatorInfo],
) -> Result<RewardBreakdown> {
    let total =
        Amount::from_u64(block_reward_credits(height)).mul_u64(economics::CREDIT_SCALE);
    let proposer_share = total.percent(economics::PROPOSER_REWARD_PCT);
    let pob_pool = total.percent(economics::CONTRIBUTOR_REWARD_PCT);

    let proposer_credit = &proposer_share + fee_pool;
    txn.credit(proposer, &proposer_credit)?;

    let mut groups: BTreeMap<String, Vec<&ValidatorInfo>> = BTreeMap::new();
    for contributor in contributors.iter().filter(|v| v.is_active) {
        groups.entry(contributor.network_group()).or_default().push(contributor);
    }

    let mut paid = 0usize;
    let mut skipped = 0usize;
    if !groups.is_empty() {
        let per_group = pob_pool.div_u64(groups.len() as u64);
        for members in groups.values() {
            let per_member = per_group.div_u64(members.len() as u64);
            for member in members {
                if member.is_suspended {
                    // Skipped without redistribution: this slice is burned.
                    skipped += 1;
                    continue;
                }
                if !per_member.is_zero() {
                    txn.credit(&member.id, &per_member)?;
                }
                paid += 1;
            }
        }
    }

    debug!(
        height,
        proposer = %proposer,
        proposer_credit = %proposer_credit,
        groups = groups.len(),
        paid,
        skipped,
        "block rewards staged"
    );

    Ok(RewardBreakdown {
        proposer: *proposer,
        proposer_credit,
        pob_pool,
        groups: groups.len(),
        contributors_paid: paid,
        skipped_suspended: skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rnr_storage::{KvStore, StateStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn state() -> (TempDir, Arc<StateStore>) {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        let state = Arc::new(StateStore::open(kv).unwrap());
        (dir, state)
    }

    fn active_validator(tag: u8, asn: Option<u32>, ip: Option<&str>) -> ValidatorInfo {
        let mut id = [0u8; 20];
        id[0] = tag;
        let mut info =
            ValidatorInfo::new_observer(Address::new(id), vec![0u8; 64], [0u8; 32], 0, 3600);
        info.is_observer = false;
        info.is_active = true;
        info.network_asn = asn;
        info.ip = ip.map(str::to_string);
        info
    }

    #[test]
    fn test_reward_schedule() {
        assert_eq!(block_reward_credits(0), 100);
        assert_eq!(block_reward_credits(999_999), 100);
        assert_eq!(block_reward_credits(1_000_000), 99);
        assert_eq!(block_reward_credits(99_000_000), 1);
        assert_eq!(block_reward_credits(500_000_000), 1);
    }

    #[test]
    fn test_proposer_takes_80_percent_plus_fees() {
        let (_dir, state) = state();
        let proposer = Address::new([1u8; 20]);
        let fees = Amount::from_u64(12345);

        let mut txn = state.begin();
        let breakdown = stage_block_rewards(&mut txn, 10, &proposer, &fees, &[]).unwrap();
        txn.commit().unwrap();

        let expected =
            Amount::from_u64(100).mul_u64(economics::CREDIT_SCALE).percent(80) + fees;
        assert_eq!(breakdown.proposer_credit, expected);
        assert_eq!(state.get_account(&proposer).unwrap().balance, expected);
        assert_eq!(breakdown.contributors_paid, 0);
    }

    #[test]
    fn test_group_fairness_splits_across_networks() {
        // Three nodes on as100, one node on as200: the as200 node gets as
        // much as the whole as100 group.
        let (_dir, state) = state();
        let proposer = Address::new([9u8; 20]);
        let contributors = vec![
            active_validator(1, Some(100), None),
            active_validator(2, Some(100), None),
            active_validator(3, Some(100), None),
            active_validator(4, Some(200), None),
        ];

        let mut txn = state.begin();
        let breakdown =
            stage_block_rewards(&mut txn, 0, &proposer, &Amount::zero(), &contributors).unwrap();
        txn.commit().unwrap();

        assert_eq!(breakdown.groups, 2);
        assert_eq!(breakdown.contributors_paid, 4);

        let per_group = breakdown.pob_pool.div_u64(2);
        let lone = state.get_account(&contributors[3].id).unwrap().balance;
        assert_eq!(lone, per_group);
        let crowd_member = state.get_account(&contributors[0].id).unwrap().balance;
        assert_eq!(crowd_member, per_group.div_u64(3));
    }

    #[test]
    fn test_subnet_fallback_grouping() {
        let (_dir, state) = state();
        let proposer = Address::new([9u8; 20]);
        let contributors = vec![
            active_validator(1, None, Some("10.0.0.1")),
            active_validator(2, None, Some("10.0.0.2")),
            active_validator(3, None, Some("192.168.1.1")),
        ];

        let mut txn = state.begin();
        let breakdown =
            stage_block_rewards(&mut txn, 0, &proposer, &Amount::zero(), &contributors).unwrap();
        txn.commit().unwrap();

        // 10.0.0.0/24 (two nodes) and 192.168.1.0/24 (one node)
        assert_eq!(breakdown.groups, 2);
    }

    #[test]
    fn test_suspended_share_is_burned() {
        let (_dir, state) = state();
        let proposer = Address::new([9u8; 20]);
        let mut suspended = active_validator(1, Some(100), None);
        suspended.is_suspended = true;
        let healthy = active_validator(2, Some(100), None);
        let contributors = vec![suspended.clone(), healthy.clone()];

        let mut txn = state.begin();
        let breakdown =
            stage_block_rewards(&mut txn, 0, &proposer, &Amount::zero(), &contributors).unwrap();
        txn.commit().unwrap();

        assert_eq!(breakdown.skipped_suspended, 1);
        assert_eq!(breakdown.contributors_paid, 1);

        // The healthy member gets a half-group share, not the whole group:
        // the suspended slice is burned, not redistributed.
        let per_member = breakdown.pob_pool.div_u64(1).div_u64(2);
        assert_eq!(state.get_account(&healthy.id).unwrap().balance, per_member);
        assert!(!state.account_exists(&suspended.id).unwrap());
    }

    #[test]
    fn test_rewards_are_atomic_with_the_block() {
        let (_dir, state) = state();
        let proposer = Address::new([1u8; 20]);

        let mut txn = state.begin();
        stage_block_rewards(&mut txn, 0, &proposer, &Amount::zero(), &[]).unwrap();
        txn.rollback();

        assert!(!state.account_exists(&proposer).unwrap());
    }
}
