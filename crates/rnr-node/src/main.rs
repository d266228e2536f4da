use anyhow::Context;
use clap::Parser;
use rnr_node::config::Config;
use rnr_node::genesis::GenesisConfig;
use rnr_node::identity::ValidatorIdentity;
use rnr_node::service::ValidatorService;
use rnr_node::shutdown::{wait_for_shutdown_signal, ShutdownHandler};
use rnr_core::{Block, Mempool};
use rnr_storage::{ChainStore, KvStore, StateStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "rnr-node", about = "Route-N-Root validator node", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Override the genesis file path
    #[arg(long)]
    genesis: Option<PathBuf>,

    /// Force structured JSON logs regardless of config
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = if Path::new(&cli.config).exists() {
        Config::from_file(&cli.config).context("loading config")?
    } else {
        Config::default()
    };
    if let Some(genesis_path) = cli.genesis {
        config.node.genesis_path = genesis_path;
    }
    config.validate().context("validating config")?;

    init_logging(&config, cli.json_logs);

    let genesis = if config.node.genesis_path.exists() {
        GenesisConfig::load(&config.node.genesis_path).context("loading genesis")?
    } else {
        warn!(path = %config.node.genesis_path.display(), "genesis file missing, using dev genesis");
        GenesisConfig::dev(1)
    };
    info!(
        chain_id = genesis.chain_id,
        network = %genesis.network_name,
        validators = genesis.initial_validators.len(),
        bootstrap_peers = genesis.bootstrap_peers.len(),
        "genesis loaded"
    );

    std::fs::create_dir_all(&config.storage.db_path).context("creating data directory")?;
    let kv = Arc::new(KvStore::open(&config.storage.db_path).context("opening database")?);
    let chain = Arc::new(ChainStore::open(kv.clone(), Block::genesis()).context("opening chain")?);
    let state = Arc::new(StateStore::open(kv.clone()).context("opening state")?);
    seed_genesis_state(&state, &genesis).context("seeding genesis state")?;

    let mempool = Arc::new(Mempool::new(config.mempool.max_size));
    let identity = ValidatorIdentity::load_or_ephemeral(
        config.node.wallet_file.as_deref(),
        config.node.wallet_password.as_deref(),
    )
    .context("loading validator identity")?;
    info!(validator = %identity.id, "validator identity ready");

    // The P2P transport layer (external) owns the other ends of these
    // channels: it feeds ingress events and drains outbound ones.
    let (outbound_tx, mut outbound_rx) = mpsc::channel(256);
    let (_ingress_tx, ingress_rx) = mpsc::channel(256);

    let service = ValidatorService::new(
        identity,
        kv,
        chain,
        state,
        mempool,
        outbound_tx,
        config.storage.retention_blocks,
    )?;

    let shutdown = ShutdownHandler::new();
    let mut handles = service.run(&shutdown, ingress_rx);

    {
        let mut shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = outbound_rx.recv() => {
                        match event {
                            Some(event) => debug!(?event, "queued for transport"),
                            None => break,
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));
    }

    info!(
        name = %config.node.name,
        p2p_port = config.network.p2p_port,
        pob_port = config.network.pob_port,
        api_port = config.network.api_port,
        metrics_port = config.network.metrics_port,
        "node started"
    );

    wait_for_shutdown_signal().await;
    shutdown.shutdown();
    for handle in handles {
        let _ = handle.await;
    }
    info!("node stopped");
    Ok(())
}

fn init_logging(config: &Config, force_json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.structured_json_logs || force_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Write the genesis validator set and balances into a fresh database
fn seed_genesis_state(state: &StateStore, genesis: &GenesisConfig) -> anyhow::Result<()> {
    if state.validator_count() > 0 {
        return Ok(());
    }

    let mut txn = state.begin();
    for validator in &genesis.initial_validators {
        txn.set_validator(GenesisConfig::validator_info(validator))?;
    }
    for entry in &genesis.initial_balances {
        txn.credit(&entry.address, &entry.balance)?;
    }
    txn.commit()?;

    if !genesis.initial_validators.is_empty() || !genesis.initial_balances.is_empty() {
        info!(
            validators = genesis.initial_validators.len(),
            balances = genesis.initial_balances.len(),
            "genesis state seeded"
        );
    }
    Ok(())
}
