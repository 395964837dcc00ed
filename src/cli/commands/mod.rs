pub mod arc4;
pub mod construct;
pub mod decode;

use crate::backend::RpcBackend;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::ledger::ProtocolChanges;
use clap::Args;
use std::sync::Arc;
use tracing::info;

/// Node connection options shared by commands that talk to Bitcoin Core
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Config file stem (config.toml is read when present)
    #[arg(long, default_value = "config")]
    pub config: String,

    /// Bitcoin RPC URL (overrides config.toml)
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Bitcoin RPC username (overrides config.toml)
    #[arg(long)]
    pub rpc_username: Option<String>,

    /// Bitcoin RPC password (overrides config.toml)
    #[arg(long)]
    pub rpc_password: Option<String>,
}

/// Everything a command needs to reach the node
pub struct NodeContext {
    pub config: AppConfig,
    pub backend: Arc<RpcBackend>,
    pub flags: Arc<ProtocolChanges>,
}

impl NodeArgs {
    /// Load configuration, apply CLI overrides and connect
    ///
    /// The protocol flags are pointed at the node's chain tip.
    pub fn connect(&self) -> AppResult<NodeContext> {
        let mut config = AppConfig::load_from(&self.config)
            .map_err(|e| AppError::Config(format!("Failed to load configuration: {}", e)))?;

        if let Some(url) = &self.rpc_url {
            config.bitcoin_rpc.url = url.clone();
        }
        if let Some(username) = &self.rpc_username {
            config.bitcoin_rpc.username = username.clone();
        }
        if let Some(password) = &self.rpc_password {
            config.bitcoin_rpc.password = password.clone();
        }

        let flags = ProtocolChanges::new(config.network)
            .with_overrides(&config.protocol_changes)
            .map_err(AppError::Config)?;

        let backend = RpcBackend::new(config.bitcoin_rpc.clone(), config.network)?;
        let tip = backend.get_block_count()?;
        flags.set_current_block_index(tip);
        info!("Connected to {:?} node at height {}", config.network, tip);

        Ok(NodeContext {
            config,
            backend: Arc::new(backend),
            flags: Arc::new(flags),
        })
    }
}
