use crate::errors::AppResult;
use clap::{Parser, Subcommand};

pub mod commands;

/// Counterparty transaction codec
#[derive(Parser)]
#[command(name = "xcp-txcodec")]
#[command(about = "Decode Counterparty messages from Bitcoin transactions and construct unsigned ones")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Decode a transaction (raw hex or txid) into its protocol message
    Decode(commands::decode::DecodeCommand),
    /// Build an unsigned transaction carrying a payload
    Construct(commands::construct::ConstructCommand),
    /// Deobfuscate bytes with the ARC4 key derived from a txid
    Arc4(commands::arc4::Arc4Command),
}

pub fn run() -> AppResult<()> {
    // Uses RUST_LOG environment variable (defaults to "error" if not set)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode(command) => command.run(),
        Commands::Construct(command) => command.run(),
        Commands::Arc4(command) => command.run(),
    }
}
