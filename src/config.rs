use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base chain the protocol runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }

    /// Base58 version byte for pay-to-pubkeyhash addresses
    pub fn address_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet | Network::Regtest => 0x6f,
        }
    }

    /// Base58 version byte for pay-to-scripthash addresses
    pub fn p2sh_address_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet | Network::Regtest => 0xc4,
        }
    }

    /// Provably unspendable burn address
    pub fn unspendable(self) -> &'static str {
        match self {
            Network::Mainnet => "1CounterpartyXXXXXXXXXXXXXXXUWLpVr",
            Network::Testnet | Network::Regtest => "mvCounterpartyXXXXXXXXXXXXXXW24Hef",
        }
    }
}

/// Application configuration loaded from config.toml or environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub network: Network,
    pub protocol: ProtocolConfig,
    pub utxo_locks: UtxoLocksConfig,
    pub p2sh_locks: P2shLocksConfig,
    pub bitcoin_rpc: BitcoinRpcConfig,
    /// Activation height overrides keyed by protocol flag name
    #[serde(default)]
    pub protocol_changes: HashMap<String, u32>,
}

/// Encoding and fee constants shared by the decoder and the constructor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub prefix: String,
    pub op_return_max_size: usize,
    pub default_regular_dust_size: u64,
    pub default_multisig_dust_size: u64,
    pub default_op_return_value: u64,
    pub default_fee_per_kb: u64,
    pub estimate_fee_per_kb: bool,
    pub estimate_fee_conf_target: u16,
    pub estimate_fee_mode: String,
    /// Hex pubkey used for multisig dust outputs when a P2SH source has none
    pub p2sh_dust_return_pubkey: Option<String>,
    pub old_style_api: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            prefix: "CNTRPRTY".to_string(),
            op_return_max_size: 80,
            default_regular_dust_size: 546,
            default_multisig_dust_size: 1000,
            default_op_return_value: 0,
            default_fee_per_kb: 10_000,
            estimate_fee_per_kb: false,
            estimate_fee_conf_target: 3,
            estimate_fee_mode: "CONSERVATIVE".to_string(),
            p2sh_dust_return_pubkey: None,
            old_style_api: false,
        }
    }
}

impl ProtocolConfig {
    pub fn prefix_bytes(&self) -> &[u8] {
        self.prefix.as_bytes()
    }
}

/// Per-address UTXO lock registry sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoLocksConfig {
    /// Number of source addresses tracked at once; 0 disables UTXO locking
    pub max_addresses: usize,
    pub max_age_secs: f64,
    pub per_address_max_size: usize,
}

impl Default for UtxoLocksConfig {
    fn default() -> Self {
        Self {
            max_addresses: 1000,
            max_age_secs: 3.0,
            per_address_max_size: 5000,
        }
    }
}

/// Locks guarding outputs of not-yet-broadcast P2SH pretxs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2shLocksConfig {
    pub max_size: usize,
    pub ttl_secs: u64,
    pub outkey_cache_size: usize,
    pub outkey_cache_ttl_secs: u64,
}

impl Default for P2shLocksConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl_secs: 180,
            outkey_cache_size: 1000,
            outkey_cache_ttl_secs: 600,
        }
    }
}

/// Bitcoin RPC configuration for the node backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinRpcConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
}

impl Default for BitcoinRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8332".to_string(),
            username: "bitcoin".to_string(),
            password: "password".to_string(),
            timeout_seconds: 60,
            max_retries: 10,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 30,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            protocol: ProtocolConfig::default(),
            utxo_locks: UtxoLocksConfig::default(),
            p2sh_locks: P2shLocksConfig::default(),
            bitcoin_rpc: BitcoinRpcConfig::default(),
            protocol_changes: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config.toml file and environment variables
    /// Environment variables take precedence over file configuration
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Same as [`AppConfig::load`] with an explicit config file stem
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let protocol = ProtocolConfig::default();
        let locks = UtxoLocksConfig::default();
        let p2sh = P2shLocksConfig::default();
        let rpc = BitcoinRpcConfig::default();
        let config = Config::builder()
            .set_default("network", "mainnet")?
            .set_default("protocol.prefix", protocol.prefix)?
            .set_default(
                "protocol.op_return_max_size",
                protocol.op_return_max_size as i64,
            )?
            .set_default(
                "protocol.default_regular_dust_size",
                protocol.default_regular_dust_size,
            )?
            .set_default(
                "protocol.default_multisig_dust_size",
                protocol.default_multisig_dust_size,
            )?
            .set_default(
                "protocol.default_op_return_value",
                protocol.default_op_return_value,
            )?
            .set_default("protocol.default_fee_per_kb", protocol.default_fee_per_kb)?
            .set_default("protocol.estimate_fee_per_kb", protocol.estimate_fee_per_kb)?
            .set_default(
                "protocol.estimate_fee_conf_target",
                protocol.estimate_fee_conf_target as i64,
            )?
            .set_default("protocol.estimate_fee_mode", protocol.estimate_fee_mode)?
            .set_default("protocol.old_style_api", protocol.old_style_api)?
            .set_default("utxo_locks.max_addresses", locks.max_addresses as i64)?
            .set_default("utxo_locks.max_age_secs", locks.max_age_secs)?
            .set_default(
                "utxo_locks.per_address_max_size",
                locks.per_address_max_size as i64,
            )?
            .set_default("p2sh_locks.max_size", p2sh.max_size as i64)?
            .set_default("p2sh_locks.ttl_secs", p2sh.ttl_secs)?
            .set_default("p2sh_locks.outkey_cache_size", p2sh.outkey_cache_size as i64)?
            .set_default("p2sh_locks.outkey_cache_ttl_secs", p2sh.outkey_cache_ttl_secs)?
            // Bitcoin RPC defaults
            .set_default("bitcoin_rpc.url", rpc.url)?
            .set_default("bitcoin_rpc.username", rpc.username)?
            .set_default("bitcoin_rpc.password", rpc.password)?
            .set_default("bitcoin_rpc.timeout_seconds", rpc.timeout_seconds)?
            .set_default("bitcoin_rpc.max_retries", rpc.max_retries as i64)?
            .set_default("bitcoin_rpc.initial_backoff_ms", rpc.initial_backoff_ms)?
            .set_default("bitcoin_rpc.backoff_multiplier", rpc.backoff_multiplier)?
            .set_default("bitcoin_rpc.max_backoff_seconds", rpc.max_backoff_seconds)?
            // Load from config.toml if it exists
            .add_source(File::with_name(path).required(false))
            // XCP_NETWORK, XCP_PROTOCOL__PREFIX, XCP_BITCOIN_RPC__URL, ...
            .add_source(
                config::Environment::with_prefix("XCP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;

        if app_config.protocol.prefix.is_empty() {
            return Err(ConfigError::Message(
                "protocol.prefix must not be empty".to_string(),
            ));
        }

        Ok(app_config)
    }

    /// Get config values, falling back to built-in defaults when nothing loads
    pub fn get_defaults() -> Self {
        Self::load().unwrap_or_default()
    }

    pub fn unspendable(&self) -> &'static str {
        self.network.unspendable()
    }
}
