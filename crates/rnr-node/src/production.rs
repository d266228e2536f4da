//! Block proposal, validation, and commit for the validator service.

use crate::service::{OutboundEvent, ValidatorService};
use anyhow::Context;
use rnr_consensus::{
    select_proposer, selection_seed, stage_block_rewards, verify_proposer_eligibility, vrf_alpha,
    ConsensusError, ForkOutcome, SlashReason, Vote,
};
use rnr_core::block::BlockHeader;
use rnr_core::constants::consensus::{CHECKPOINT_INTERVAL, MAX_NEW_ADDRESSES_PER_BLOCK};
use rnr_core::constants::pob;
use rnr_core::{Account, Address, Block, Hash, PohTicker};
use rnr_crypto::merkle_root;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

impl ValidatorService {
    /// Build, stamp, and sign a block for the given height. Any failure
    /// aborts the proposal with no partial state written anywhere.
    pub(crate) fn propose_block(
        &self,
        tip: &Block,
        height: u64,
        now: u64,
    ) -> anyhow::Result<Block> {
        let me = self
            .state
            .get_validator(&self.identity.id)
            .context("local validator is not registered")?;
        if me.is_suspended {
            anyhow::bail!("local validator is suspended");
        }

        // Dynamic capacity from our own measured upload bandwidth
        let capacity = pob::dynamic_block_capacity(me.upload_bandwidth);
        let transactions = self.mempool.select_for_capacity(capacity);

        let leaves: Vec<Hash> = transactions.iter().map(|tx| tx.id()).collect();
        let merkle = merkle_root(&leaves);

        let poh_stamp = self.poh.lock().tick();

        let (vrf_output, vrf_proof) = self.identity.vrf.prove(&vrf_alpha(height));

        let thresholds = self.retarget.thresholds();
        let header = BlockHeader {
            version: 1,
            prev_hash: tip.hash(),
            merkle_root: merkle,
            timestamp: now,
            height,
            difficulty: (thresholds.min_upload_mbps * 1000.0).round() as u64,
            pob_score: me.pob_score,
            pob_weight: BlockHeader::pob_weight_from_score(me.pob_score),
            vrf_proof: vrf_proof.to_bytes().to_vec(),
            vrf_output,
        };

        let mut block = Block::new(header, transactions, self.identity.id, poh_stamp);
        block.sign(&self.identity.keypair);

        debug!(
            height,
            txs = block.transactions.len(),
            capacity_bytes = capacity,
            "block proposed"
        );
        Ok(block)
    }

    /// Full validation of a received block, in order: chain linkage (a
    /// mismatch defers to the fork resolver), structure and Merkle root, PoH
    /// stamp, per-transaction signature/nonce/balance, the new-address spam
    /// bound, proposer selection, the VRF eligibility binding, and the
    /// proposer's block signature. Any failure rejects the block; nothing is
    /// mutated.
    pub fn validate_block(&self, block: &Block) -> rnr_consensus::Result<()> {
        let tip = self.chain.tip();
        if block.header.prev_hash != tip.hash() || block.height() != tip.height() + 1 {
            return Err(ConsensusError::OrphanDeferred(hex::encode(block.header.prev_hash)));
        }

        block.validate_structure().map_err(|e| ConsensusError::InvalidBlock(e.to_string()))?;

        if block.poh_stamp.tick < tip.poh_stamp.tick || block.poh_stamp.hash == [0u8; 32] {
            return Err(ConsensusError::InvalidBlock("malformed PoH stamp".to_string()));
        }

        // Transactions are checked against a working view so several sends
        // from one sender validate exactly as they will apply.
        let mut working: HashMap<Address, Account> = HashMap::new();
        let mut new_addresses: HashSet<Address> = HashSet::new();
        for tx in &block.transactions {
            tx.verify_signature()
                .map_err(|e| ConsensusError::InvalidTransaction(e.to_string()))?;

            for address in [tx.from, tx.to] {
                if !working.contains_key(&address) && !self.state.account_exists(&address)? {
                    new_addresses.insert(address);
                }
            }

            let sender = match working.get(&tx.from) {
                Some(account) => account.clone(),
                None => self.state.get_account(&tx.from)?,
            };
            if tx.nonce != sender.nonce {
                return Err(ConsensusError::InvalidTransaction(format!(
                    "nonce mismatch for {}: expected {}, got {}",
                    tx.from, sender.nonce, tx.nonce
                )));
            }
            let total = &tx.amount + &tx.fee;
            let Some(remaining) = sender.balance.checked_sub(&total) else {
                return Err(ConsensusError::InvalidTransaction(format!(
                    "insufficient balance for {}",
                    tx.from
                )));
            };

            let mut sender = sender;
            sender.balance = remaining;
            sender.nonce += 1;
            working.insert(tx.from, sender);

            let mut recipient = match working.get(&tx.to) {
                Some(account) => account.clone(),
                None => self.state.get_account(&tx.to)?,
            };
            recipient.balance += &tx.amount;
            working.insert(tx.to, recipient);
        }

        if new_addresses.len() > MAX_NEW_ADDRESSES_PER_BLOCK {
            return Err(ConsensusError::InvalidBlock(format!(
                "introduces {} new addresses (max {})",
                new_addresses.len(),
                MAX_NEW_ADDRESSES_PER_BLOCK
            )));
        }

        let proposer = self
            .state
            .get_validator(&block.proposer_id)
            .ok_or(ConsensusError::ValidatorNotFound(block.proposer_id))?;
        if proposer.is_suspended {
            return Err(ConsensusError::SuspendedValidator(block.proposer_id));
        }

        let active = self.state.active_validators();
        let eligible: Vec<rnr_consensus::EligibleValidator> =
            active.iter().map(Into::into).collect();

        let seed = selection_seed(&tip.hash(), block.height());
        let expected = select_proposer(&seed, &eligible)?;
        if expected != block.proposer_id {
            return Err(ConsensusError::NotProposer { expected, actual: block.proposer_id });
        }

        verify_proposer_eligibility(&block.header, &block.proposer_id, &eligible)?;

        block
            .verify_signature(&proposer.public_key)
            .map_err(|_| ConsensusError::InvalidSignature)?;

        Ok(())
    }

    /// Handle a block arriving from a peer: validate and vote when it
    /// extends our tip; hand competing blocks to the fork resolver; slash
    /// provably-authored invalid proposals.
    pub fn handle_network_block(&self, block: Block, now: u64) -> anyhow::Result<()> {
        match self.validate_block(&block) {
            Ok(()) => self.vote_on_block(block, now),
            Err(ConsensusError::OrphanDeferred(_)) => {
                let finalized = self.checkpoints.finalized_height();
                match self.forks.observe_block(block, finalized, now) {
                    Ok(ForkOutcome::Reorged { new_height, .. }) => {
                        self.metrics.reorgs.fetch_add(1, Ordering::Relaxed);
                        self.metrics.block_height.store(new_height, Ordering::Relaxed);
                        info!(new_height, "chain reorganized");
                        Ok(())
                    }
                    Ok(outcome) => {
                        debug!(?outcome, "competing block observed");
                        Ok(())
                    }
                    Err(ConsensusError::ReorgBlocked { candidate, finalized }) => {
                        warn!(candidate, finalized, "reorg blocked by finality guard");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                warn!(
                    proposer = %block.proposer_id,
                    height = block.height(),
                    error = %e,
                    "invalid block rejected"
                );
                // Slash only when the proposer provably authored the junk:
                // a forged proposer field must not frame an honest validator.
                if let Some(proposer) = self.state.get_validator(&block.proposer_id) {
                    if block.verify_signature(&proposer.public_key).is_ok()
                        && !matches!(e, ConsensusError::SuspendedValidator(_))
                    {
                        self.punish_invalid_block(&block, now);
                    }
                }
                Ok(())
            }
        }
    }

    fn punish_invalid_block(&self, block: &Block, now: u64) {
        let evidence = block.hash().to_vec();
        match self.slashing.slash(
            block.proposer_id,
            SlashReason::InvalidBlock,
            block.height(),
            evidence,
            now,
        ) {
            Ok(_) => {
                self.metrics.slashing_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "slashing for invalid block failed"),
        }
    }

    /// Open (or join) the voting session for a validated block and cast our
    /// own vote if we are an eligible voter.
    fn vote_on_block(&self, block: Block, now: u64) -> anyhow::Result<()> {
        let block_hash = block.hash();
        let height = block.height();
        let active = self.state.active_validators();

        self.voting.open_session(block_hash, height, active.len(), now);
        self.pending_blocks.lock().insert(block_hash, block);

        let mut finalized = false;
        if let Some(me) = self.state.get_validator(&self.identity.id) {
            if me.can_vote() {
                let vote = Vote::signed(block_hash, self.identity.id, &self.identity.keypair, now);
                self.broadcast(OutboundEvent::Vote(vote.clone()));
                match self.voting.submit_vote(vote, &me, now) {
                    Ok(outcome) => {
                        self.metrics.votes_processed.fetch_add(1, Ordering::Relaxed);
                        finalized = outcome.finalized;
                    }
                    Err(e) => debug!(error = %e, "own vote not recorded"),
                }
            }
        }

        if finalized {
            self.try_commit_pending(&block_hash, now)?;
        }
        Ok(())
    }

    /// Commit a pending block once its session finalized
    pub(crate) fn try_commit_pending(&self, block_hash: &Hash, now: u64) -> anyhow::Result<()> {
        let Some(block) = self.pending_blocks.lock().remove(block_hash) else {
            debug!(block = %hex::encode(block_hash), "finalized block not pending here");
            return Ok(());
        };
        self.commit_block(block, now)
    }

    /// Append the block to the main chain and apply its state effects
    /// atomically: transfers, fee burn, and rewards commit together or not
    /// at all. A failed apply unwinds the chain append and surfaces the
    /// error for the slot-level retry.
    pub(crate) fn commit_block(&self, block: Block, now: u64) -> anyhow::Result<()> {
        let height = block.height();
        let block_hash = block.hash();
        let tx_ids: Vec<Hash> = block.transactions.iter().map(|tx| tx.id()).collect();

        self.chain.add_block(block.clone())?;

        let mut txn = self.state.begin();
        let outcome = match self.state.stage_block(&mut txn, &block) {
            Ok(outcome) => outcome,
            Err(e) => {
                txn.rollback();
                let _ = self.chain.rollback_to(height - 1);
                return Err(e).context("staging block transactions");
            }
        };

        let contributors = self.state.validators_snapshot();
        if let Err(e) = stage_block_rewards(
            &mut txn,
            height,
            &block.proposer_id,
            &outcome.fee_pool,
            &contributors,
        ) {
            txn.rollback();
            let _ = self.chain.rollback_to(height - 1);
            return Err(e).context("staging block rewards");
        }

        if let Err(e) = txn.commit() {
            let _ = self.chain.rollback_to(height - 1);
            return Err(e).context("committing block state");
        }

        self.mempool.remove(&tx_ids);

        // Follow a foreign proposer's PoH chain forward
        {
            let mut poh = self.poh.lock();
            if block.poh_stamp.tick > poh.stamp().tick {
                *poh = PohTicker::resume(block.poh_stamp);
            }
        }

        let active_count = self.state.active_validators().len();
        self.retarget.record_sample(active_count);
        self.retarget.maybe_retarget(height);

        if height % CHECKPOINT_INTERVAL == 0 {
            let votes =
                self.voting.session(&block_hash).map(|s| s.votes.len()).unwrap_or_default();
            let state_root = self.state.state_root()?;
            self.checkpoints.maybe_checkpoint(
                height,
                block_hash,
                state_root,
                votes,
                active_count,
            )?;
        }

        self.metrics.block_height.store(height, Ordering::Relaxed);
        self.metrics
            .finalized_height
            .store(self.checkpoints.finalized_height(), Ordering::Relaxed);
        self.metrics.mempool_size.store(self.mempool.len() as u64, Ordering::Relaxed);

        let finalized = self.checkpoints.finalized_height();
        if let Err(e) = self.forks.try_attach_orphans(finalized, now) {
            warn!(error = %e, "orphan retry after commit failed");
        }

        info!(
            height,
            block = %hex::encode(block_hash),
            txs = tx_ids.len(),
            "block committed"
        );
        Ok(())
    }
}
