use super::NodeArgs;
use crate::encoding::EncodingChoice;
use crate::errors::{AppError, AppResult};
use crate::transaction::{ConstructOutput, DustReturnPubkey, TransactionService, TxRequest};
use bitcoin::Txid;
use clap::Args;
use tracing::{debug, info};

/// Build an unsigned transaction from an address's coins
#[derive(Args)]
pub struct ConstructCommand {
    /// Address (or multisig array) paying for the transaction
    #[arg(long)]
    pub source: String,

    /// Destination as `address` or `address:satoshis`; repeatable
    #[arg(long = "destination")]
    pub destinations: Vec<String>,

    /// Payload as hex, without the protocol prefix
    #[arg(long)]
    pub data: Option<String>,

    /// auto, opreturn, multisig, pubkeyhash or p2sh
    #[arg(long, default_value = "auto")]
    pub encoding: String,

    /// Fee rate in satoshis per kilobyte (overrides config.toml)
    #[arg(long)]
    pub fee_per_kb: Option<u64>,

    /// Pay exactly this fee
    #[arg(long)]
    pub exact_fee: Option<u64>,

    /// Public key (hex) for resolving pubkeyhash addresses; repeatable
    #[arg(long = "pubkey")]
    pub pubkeys: Vec<String>,

    /// Public key (hex) for the third slot of multisig data outputs
    #[arg(long)]
    pub dust_return_pubkey: Option<String>,

    /// Allow spending unconfirmed coins
    #[arg(long)]
    pub unconfirmed: bool,

    /// Build the P2SH pretx as segwit and return both transactions
    #[arg(long)]
    pub segwit: bool,

    /// Txid of a broadcast P2SH pretx to build the data transaction on
    #[arg(long)]
    pub p2sh_pretx_txid: Option<Txid>,

    /// Print input, output, change and fee amounts alongside the hex
    #[arg(long)]
    pub extended: bool,

    #[command(flatten)]
    pub node: NodeArgs,
}

impl ConstructCommand {
    pub fn run(&self) -> AppResult<()> {
        let request = self.request()?;
        let node = self.node.connect()?;
        let service = TransactionService::new(&node.config, node.backend.clone(), node.flags.clone());

        let mut options = service.default_options();
        options.encoding = self
            .encoding
            .parse::<EncodingChoice>()
            .map_err(|e| AppError::InvalidData(e.to_string()))?;
        if let Some(fee_per_kb) = self.fee_per_kb {
            options.fee_per_kb = fee_per_kb;
        }
        options.exact_fee = self.exact_fee;
        options.provided_pubkeys = self.pubkeys.clone();
        if let Some(pubkey) = &self.dust_return_pubkey {
            options.dust_return_pubkey = DustReturnPubkey::Explicit(pubkey.clone());
        }
        options.allow_unconfirmed_inputs = self.unconfirmed;
        options.segwit = self.segwit;
        options.p2sh_pretx_txid = self.p2sh_pretx_txid;
        options.extended_tx_info = self.extended;

        info!(
            "Constructing transaction from {} ({} destinations, encoding {})",
            request.source,
            request.destinations.len(),
            options.encoding
        );
        let output = service.construct(&request, &options)?;
        debug!("RPC errors encountered: {}", node.backend.get_error_count());
        print_output(&output)
    }

    fn request(&self) -> AppResult<TxRequest> {
        let mut request = TxRequest::new(self.source.clone());
        for destination in &self.destinations {
            let (address, value) = parse_destination(destination)?;
            request = request.with_destination(address, value);
        }
        if let Some(data) = &self.data {
            request = request.with_data(hex::decode(data)?);
        }
        Ok(request)
    }
}

/// `address` or `address:satoshis`
pub fn parse_destination(arg: &str) -> AppResult<(String, Option<u64>)> {
    match arg.rsplit_once(':') {
        Some((address, value)) => {
            let value = value
                .parse::<u64>()
                .map_err(|e| AppError::InvalidData(format!("Invalid destination value {}: {}", value, e)))?;
            Ok((address.to_string(), Some(value)))
        }
        None => Ok((arg.to_string(), None)),
    }
}

fn print_output(output: &ConstructOutput) -> AppResult<()> {
    match output {
        ConstructOutput::Extended(_) => println!("{}", serde_json::to_string_pretty(output)?),
        _ => {
            for hex in output.hexes() {
                println!("{}", hex);
            }
        }
    }
    Ok(())
}
