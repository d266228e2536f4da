use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Node configuration, loaded from TOML at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub mempool: MempoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name/identifier
    pub name: String,

    /// Path to the genesis file (chain id, network name, initial validators,
    /// bootstrap peers)
    pub genesis_path: PathBuf,

    /// Data directory
    pub data_dir: PathBuf,

    /// Validator keystore; an ephemeral dev keypair is generated when unset
    #[serde(default)]
    pub wallet_file: Option<PathBuf>,

    /// Password for the keystore
    #[serde(default)]
    pub wallet_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// libp2p listen port
    pub p2p_port: u16,

    /// PoB test server port
    pub pob_port: u16,

    /// Query API port
    pub api_port: u16,

    /// Prometheus endpoint port
    pub metrics_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { p2p_port: 6000, pob_port: 8080, api_port: 5000, metrics_port: 9090 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database path; defaults to <data_dir>/db when relative
    pub db_path: PathBuf,

    /// Blocks to keep below the finalized checkpoint
    pub retention_blocks: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/db"),
            retention_blocks: rnr_core::constants::storage::DEFAULT_RETENTION_BLOCKS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit structured JSON logs
    pub structured_json_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), structured_json_logs: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Maximum number of transactions held in the pool
    pub max_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self { max_size: 10_000 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                name: "rnr-node".to_string(),
                genesis_path: PathBuf::from("./genesis.json"),
                data_dir: PathBuf::from("./data"),
                wallet_file: None,
                wallet_password: None,
            },
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            mempool: MempoolConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node.name.is_empty() {
            anyhow::bail!("node name must not be empty");
        }

        if self.network.p2p_port == 0
            || self.network.pob_port == 0
            || self.network.api_port == 0
            || self.network.metrics_port == 0
        {
            anyhow::bail!("all ports must be non-zero");
        }

        if self.storage.retention_blocks == 0 {
            anyhow::bail!("retention_blocks must be greater than 0");
        }

        if self.node.wallet_file.is_some() && self.node.wallet_password.is_none() {
            anyhow::bail!("wallet_file set without wallet_password");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!("invalid log level: {}", self.logging.level);
        }

        Ok(())
    }
}
