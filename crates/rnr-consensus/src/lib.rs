pub mod checkpoint;
pub mod circuit_breaker;
pub mod error;
pub mod fork;
pub mod registry;
pub mod retarget;
pub mod rewards;
pub mod selection;
pub mod slashing;
pub mod voting;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{ConsensusError, Result};
pub use fork::{ChainInfo, ForkOutcome, ForkResolver};
pub use registry::{entry_fee, observer_duration_secs, RegistrationRequest, ValidatorRegistry};
pub use retarget::{PobRetargetManager, PobThresholds};
pub use rewards::{block_reward_credits, stage_block_rewards, RewardBreakdown};
pub use selection::{
    select_proposer, selection_seed, verify_proposer_eligibility, vrf_alpha, EligibleValidator,
};
pub use slashing::{SlashReason, SlashingEvent, SlashingManager};
pub use voting::{Vote, VoteOutcome, VotingManager, VotingSession};
