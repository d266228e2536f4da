//! The validator service: the only component with write access to the
//! chain, state, voting, registry, fork, and checkpoint layers, and the
//! owner of every background loop.
//!
//! Lock-order discipline: state -> voting -> registry -> fork resolver. No
//! component mutex is ever held across an await point; CPU-bound work
//! (hashing, signature and VRF checks) runs to completion on its task.

use crate::identity::ValidatorIdentity;
use crate::intake::{self, SubmitReceipt, SubmitTransaction};
use crate::metrics::NodeMetrics;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::shutdown::ShutdownHandler;
use anyhow::Context;
use parking_lot::Mutex;
use rnr_consensus::{
    select_proposer, selection_seed, CheckpointManager, CircuitBreaker, EligibleValidator,
    ForkResolver, PobRetargetManager, SlashReason, SlashingManager, ValidatorRegistry, Vote,
    VotingManager,
};
use rnr_core::constants::consensus::{BLOCK_TIME_SECS, POH_TICK_SECS};
use rnr_core::{Address, Block, Hash, Mempool, PohTicker, Transaction};
use rnr_storage::{ChainStore, KvStore, StatePruner, StateStore};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MAINTENANCE_INTERVAL_SECS: u64 = 30;
const CLEANUP_INTERVAL_SECS: u64 = 60;
const PRUNING_INTERVAL_SECS: u64 = 3600;
const METRICS_INTERVAL_SECS: u64 = 10;
/// Candidate chains idle longer than this are discarded
const CANDIDATE_MAX_AGE_SECS: u64 = 600;
/// A PoB measurement older than this counts as stale for the partition check
const POB_TEST_STALE_SECS: u64 = 3600;

/// Events arriving from the P2P transport layer
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    Block(Block),
    Vote(Vote),
    Transaction(Transaction),
    /// A validator announcing (or rotating) its VRF public key
    VrfAnnouncement { validator: Address, vrf_public_key: [u8; 32] },
    /// Measurement result from the PoB test protocol
    PobSample {
        validator: Address,
        pob_score: f64,
        upload_bandwidth: f64,
        latency_ms: f64,
        packet_loss_pct: f64,
    },
}

/// Events this node emits toward the transport layer
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    BlockProposal(Block),
    Vote(Vote),
}

/// What one slot amounted to for this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    Proposed { height: u64, finalized: bool },
    AwaitingProposal { proposer: Address },
    NotEligible,
}

pub struct ValidatorService {
    pub(crate) identity: ValidatorIdentity,
    pub(crate) chain: Arc<ChainStore>,
    pub(crate) state: Arc<StateStore>,
    pub(crate) mempool: Arc<Mempool>,
    pub(crate) poh: Mutex<PohTicker>,
    pub(crate) voting: Arc<VotingManager>,
    pub(crate) registry: Arc<ValidatorRegistry>,
    pub(crate) slashing: Arc<SlashingManager>,
    pub(crate) forks: ForkResolver,
    pub(crate) checkpoints: Arc<CheckpointManager>,
    pub(crate) retarget: PobRetargetManager,
    pub(crate) pruner: StatePruner,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) outbound: mpsc::Sender<OutboundEvent>,
    /// Validated blocks awaiting supermajority, keyed by block hash
    pub(crate) pending_blocks: Mutex<HashMap<Hash, Block>>,
    pub metrics: Arc<NodeMetrics>,
}

impl ValidatorService {
    pub fn new(
        identity: ValidatorIdentity,
        kv: Arc<KvStore>,
        chain: Arc<ChainStore>,
        state: Arc<StateStore>,
        mempool: Arc<Mempool>,
        outbound: mpsc::Sender<OutboundEvent>,
        retention_blocks: u64,
    ) -> anyhow::Result<Arc<Self>> {
        let voting = Arc::new(VotingManager::new(kv.clone()));
        let recovered = voting.recover().context("recovering persisted votes")?;
        if recovered > 0 {
            info!(votes = recovered, "restored processed vote ids");
        }

        let registry = Arc::new(ValidatorRegistry::new(state.clone()));
        let slashing = Arc::new(SlashingManager::new(kv.clone(), registry.clone()));
        let forks = ForkResolver::new(chain.clone(), kv.clone());
        let checkpoints =
            Arc::new(CheckpointManager::open(kv.clone()).context("opening checkpoints")?);
        let pruner = StatePruner::new(kv.clone(), checkpoints.clone(), retention_blocks);
        let poh = Mutex::new(PohTicker::resume(chain.tip().poh_stamp));

        Ok(Arc::new(Self {
            identity,
            chain,
            state,
            mempool,
            poh,
            voting,
            registry,
            slashing,
            forks,
            checkpoints,
            retarget: PobRetargetManager::new(),
            pruner,
            breaker: CircuitBreaker::default(),
            outbound,
            pending_blocks: Mutex::new(HashMap::new()),
            metrics: Arc::new(NodeMetrics::default()),
        }))
    }

    pub fn validator_id(&self) -> Address {
        self.identity.id
    }

    pub fn finalized_height(&self) -> u64 {
        self.checkpoints.finalized_height()
    }

    /// Unix seconds from the node clock
    pub fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    pub(crate) fn broadcast(&self, event: OutboundEvent) {
        if let Err(e) = self.outbound.try_send(event) {
            warn!(error = %e, "outbound transport channel rejected event");
        }
    }

    /// One production slot: determine the proposer from the tip and the
    /// active set; propose, open the voting session, and cast our own vote
    /// when selected, otherwise wait for the proposal off the wire.
    pub fn handle_slot(&self, now: u64) -> anyhow::Result<SlotOutcome> {
        let tip = self.chain.tip();
        let height = tip.height() + 1;

        let active = self.state.active_validators();
        if active.is_empty() {
            debug!("no active validators, skipping slot");
            return Ok(SlotOutcome::NotEligible);
        }
        let eligible: Vec<EligibleValidator> = active.iter().map(Into::into).collect();

        let seed = selection_seed(&tip.hash(), height);
        let proposer = select_proposer(&seed, &eligible)?;

        if proposer != self.identity.id {
            debug!(height, proposer = %proposer, "awaiting proposal from selected validator");
            return Ok(SlotOutcome::AwaitingProposal { proposer });
        }

        info!(height, "selected as proposer");
        let block = self.propose_block(&tip, height, now)?;
        let block_hash = block.hash();

        self.voting.open_session(block_hash, height, active.len(), now);
        self.pending_blocks.lock().insert(block_hash, block.clone());
        self.broadcast(OutboundEvent::BlockProposal(block));
        self.metrics.blocks_proposed.fetch_add(1, Ordering::Relaxed);

        // The proposer votes for its own block like any other validator
        let mut finalized = false;
        if let Some(me) = self.state.get_validator(&self.identity.id) {
            let vote = Vote::signed(block_hash, self.identity.id, &self.identity.keypair, now);
            self.broadcast(OutboundEvent::Vote(vote.clone()));
            match self.voting.submit_vote(vote, &me, now) {
                Ok(outcome) => {
                    self.metrics.votes_processed.fetch_add(1, Ordering::Relaxed);
                    finalized = outcome.finalized;
                }
                Err(e) => warn!(error = %e, "own vote rejected"),
            }
        }

        if finalized {
            self.try_commit_pending(&block_hash, now)?;
        }
        Ok(SlotOutcome::Proposed { height, finalized })
    }

    /// Record a vote arriving from a peer
    pub fn handle_network_vote(&self, vote: Vote, now: u64) -> anyhow::Result<()> {
        let Some(voter) = self.state.get_validator(&vote.validator_id) else {
            warn!(validator = %vote.validator_id, "vote from unknown validator dropped");
            return Ok(());
        };
        let block_hash = vote.block_hash;
        let validator_id = vote.validator_id;

        match self.voting.submit_vote(vote, &voter, now) {
            Ok(outcome) => {
                self.metrics.votes_processed.fetch_add(1, Ordering::Relaxed);

                if let Some(evidence) = outcome.double_vote_evidence {
                    let height =
                        self.voting.session(&block_hash).map(|s| s.height).unwrap_or_default();
                    self.punish(validator_id, SlashReason::DoubleVoting, height, evidence, now);
                }

                if outcome.finalized {
                    self.try_commit_pending(&block_hash, now)?;
                }
                Ok(())
            }
            Err(e @ rnr_consensus::ConsensusError::ReplayDetected(_)) => {
                warn!(security = true, validator = %validator_id, error = %e, "vote replay");
                let height =
                    self.voting.session(&block_hash).map(|s| s.height).unwrap_or_default();
                let mut evidence = Vec::with_capacity(52);
                evidence.extend_from_slice(&block_hash);
                evidence.extend_from_slice(validator_id.as_bytes());
                self.punish(validator_id, SlashReason::InvalidVote, height, evidence, now);
                Ok(())
            }
            Err(e @ rnr_consensus::ConsensusError::DoubleVote { .. }) => {
                warn!(security = true, validator = %validator_id, error = %e, "double vote");
                let height =
                    self.voting.session(&block_hash).map(|s| s.height).unwrap_or_default();
                let mut evidence = Vec::with_capacity(64);
                evidence.extend_from_slice(&block_hash);
                evidence.extend_from_slice(&block_hash);
                self.punish(validator_id, SlashReason::DoubleVoting, height, evidence, now);
                Ok(())
            }
            Err(e @ rnr_consensus::ConsensusError::SuspendedValidator(_)) => {
                warn!(security = true, validator = %validator_id, error = %e, "suspended voter");
                Ok(())
            }
            Err(e) => {
                // Validation failure: log and drop, never mutate state
                debug!(validator = %validator_id, error = %e, "vote rejected");
                Ok(())
            }
        }
    }

    fn punish(
        &self,
        validator: Address,
        reason: SlashReason,
        height: u64,
        evidence: Vec<u8>,
        now: u64,
    ) {
        match self.slashing.slash(validator, reason, height, evidence, now) {
            Ok(_) => {
                self.metrics.slashing_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(validator = %validator, error = %e, "slashing failed"),
        }
    }

    /// Accept a transaction from a peer into the mempool. Peer-relayed
    /// transactions carry full signatures and are verified before pooling.
    pub fn handle_network_transaction(&self, tx: Transaction) {
        if let Err(e) = tx.verify_signature() {
            debug!(error = %e, "peer transaction rejected");
            return;
        }
        match self.mempool.insert(tx) {
            Ok(_) => {}
            Err(e) => debug!(error = %e, "peer transaction not pooled"),
        }
    }

    /// Submit-transaction entry used by the query API layer
    pub fn submit_transaction(
        &self,
        request: SubmitTransaction,
    ) -> Result<SubmitReceipt, intake::IntakeError> {
        intake::submit_transaction(&self.mempool, request, Self::now())
    }

    /// Register a new observer validator (called from the query layer)
    pub fn register_validator(
        &self,
        request: rnr_consensus::RegistrationRequest,
    ) -> rnr_consensus::Result<rnr_core::ValidatorInfo> {
        self.registry.register(request, Self::now())
    }

    /// Ingest a PoB measurement for a known validator
    pub fn ingest_pob_sample(
        &self,
        validator: &Address,
        pob_score: f64,
        upload_bandwidth: f64,
        latency_ms: f64,
        packet_loss_pct: f64,
        now: u64,
    ) {
        if let Err(e) = self.registry.record_pob_sample(
            validator,
            pob_score,
            upload_bandwidth,
            latency_ms,
            packet_loss_pct,
            now,
        ) {
            debug!(validator = %validator, error = %e, "pob sample dropped");
        }
    }

    /// Record a validator's announced VRF public key
    pub fn handle_vrf_announcement(&self, validator: &Address, vrf_public_key: [u8; 32]) {
        let Some(mut info) = self.state.get_validator(validator) else {
            debug!(validator = %validator, "vrf announcement from unknown validator");
            return;
        };
        if info.vrf_public_key == vrf_public_key {
            return;
        }
        info.vrf_public_key = vrf_public_key;
        if let Err(e) = self.state.put_validator(info) {
            warn!(validator = %validator, error = %e, "vrf key update failed");
        }
    }

    pub fn update_metrics(&self) {
        self.metrics.block_height.store(self.chain.height(), Ordering::Relaxed);
        self.metrics
            .finalized_height
            .store(self.checkpoints.finalized_height(), Ordering::Relaxed);
        self.metrics.mempool_size.store(self.mempool.len() as u64, Ordering::Relaxed);
        self.metrics
            .active_validators
            .store(self.state.active_validators().len() as u64, Ordering::Relaxed);
    }

    /// Spawn every background loop. Each loop owns its timer and exits at
    /// the next await once the shutdown signal fires.
    pub fn run(
        self: &Arc<Self>,
        shutdown: &ShutdownHandler,
        mut ingress: mpsc::Receiver<NetworkEvent>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // Block-production loop
        {
            let service = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(BLOCK_TIME_SECS));
                let policy = RetryPolicy::default();
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if !service.breaker.allow_request() {
                                warn!("storage circuit open, skipping slot");
                                continue;
                            }
                            let outcome = retry_with_backoff(&policy, "slot", || {
                                let service = service.clone();
                                async move { service.handle_slot(ValidatorService::now()) }
                            })
                            .await;
                            match outcome {
                                Ok(outcome) => {
                                    service.breaker.record_success();
                                    debug!(?outcome, "slot handled");
                                }
                                Err(e) => {
                                    service.breaker.record_failure();
                                    error!(error = %e, "slot failed after retries");
                                }
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
                info!("block production loop stopped");
            }));
        }

        // PoH tick loop
        {
            let service = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(POH_TICK_SECS));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            service.poh.lock().tick();
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        // Registry maintenance loop
        {
            let service = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let now = ValidatorService::now();
                            if let Err(e) = service.registry.activate_pending(now) {
                                warn!(error = %e, "observer activation sweep failed");
                            }
                            if let Err(e) = service.registry.process_exits(now) {
                                warn!(error = %e, "exit processing failed");
                            }
                            service.registry.partition_check(now, POB_TEST_STALE_SECS);
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        // Cleanup loop
        {
            let service = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let now = ValidatorService::now();
                            let finalized = service.checkpoints.finalized_height();
                            if let Err(e) = service.registry.sweep_suspensions(now) {
                                warn!(error = %e, "suspension sweep failed");
                            }
                            if let Err(e) = service.voting.cleanup(finalized) {
                                warn!(error = %e, "vote cleanup failed");
                            }
                            service.slashing.trim_history(finalized.saturating_sub(1000));
                            service.checkpoints.trim(finalized.saturating_sub(1000));
                            service.forks.prune(finalized, now, CANDIDATE_MAX_AGE_SECS);
                            if let Err(e) = service.forks.try_attach_orphans(finalized, now) {
                                warn!(error = %e, "orphan retry failed");
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        // State pruning loop
        {
            let service = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(PRUNING_INTERVAL_SECS));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match service.pruner.prune() {
                                Ok(stats) if stats.blocks_pruned > 0 => {
                                    info!(blocks = stats.blocks_pruned, "state pruned");
                                }
                                Ok(_) => {}
                                Err(e) => warn!(error = %e, "pruning failed"),
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        // Metrics loop
        {
            let service = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(METRICS_INTERVAL_SECS));
                loop {
                    tokio::select! {
                        _ = interval.tick() => service.update_metrics(),
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        // P2P ingress loop
        {
            let service = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = ingress.recv() => {
                            let Some(event) = event else { break };
                            let now = ValidatorService::now();
                            let result = match event {
                                NetworkEvent::Block(block) => {
                                    service.handle_network_block(block, now)
                                }
                                NetworkEvent::Vote(vote) => {
                                    service.handle_network_vote(vote, now)
                                }
                                NetworkEvent::Transaction(tx) => {
                                    service.handle_network_transaction(tx);
                                    Ok(())
                                }
                                NetworkEvent::VrfAnnouncement { validator, vrf_public_key } => {
                                    service.handle_vrf_announcement(&validator, vrf_public_key);
                                    Ok(())
                                }
                                NetworkEvent::PobSample {
                                    validator,
                                    pob_score,
                                    upload_bandwidth,
                                    latency_ms,
                                    packet_loss_pct,
                                } => {
                                    service.ingest_pob_sample(
                                        &validator,
                                        pob_score,
                                        upload_bandwidth,
                                        latency_ms,
                                        packet_loss_pct,
                                        now,
                                    );
                                    Ok(())
                                }
                            };
                            if let Err(e) = result {
                                warn!(error = %e, "ingress event failed");
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
                info!("ingress loop stopped");
            }));
        }

        handles
    }
}
