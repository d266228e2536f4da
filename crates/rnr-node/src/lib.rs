pub mod config;
pub mod genesis;
pub mod identity;
pub mod intake;
pub mod metrics;
pub mod production;
pub mod retry;
pub mod service;
pub mod shutdown;

pub use config::Config;
pub use genesis::GenesisConfig;
pub use identity::ValidatorIdentity;
pub use metrics::NodeMetrics;
pub use service::{NetworkEvent, OutboundEvent, SlotOutcome, ValidatorService};
pub use shutdown::ShutdownHandler;
