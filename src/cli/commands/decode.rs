use super::NodeArgs;
use crate::backend::Backend;
use crate::decoder::TxInfoExtractor;
use crate::errors::{AppError, AppResult};
use crate::types::counterparty::{unpack_message_type, TypeIdFormat};
use crate::types::{CounterpartyMessageType, TxInfo};
use bitcoin::{Transaction, Txid};
use clap::Args;
use tracing::{debug, info};

/// Decode a transaction into its protocol message
#[derive(Args)]
pub struct DecodeCommand {
    /// Raw transaction hex, or a txid to fetch from the node
    pub tx: String,

    /// Decode with the rules active at this height (defaults to the chain tip)
    #[arg(long)]
    pub block_index: Option<u32>,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,

    #[command(flatten)]
    pub node: NodeArgs,
}

impl DecodeCommand {
    pub fn run(&self) -> AppResult<()> {
        let node = self.node.connect()?;
        let tx = load_transaction(&self.tx, |txid| {
            node.backend
                .get_transaction(txid)
                .map_err(|e| AppError::InvalidData(format!("Failed to fetch {}: {}", txid, e)))
        })?;
        let txid = tx.compute_txid();
        info!("Decoding transaction {}", txid);

        let extractor = TxInfoExtractor::new(
            node.config.network,
            node.config.protocol.prefix_bytes(),
            node.flags.clone(),
            node.backend.clone(),
        );
        let tx_info = extractor.get_tx_info(&tx, self.block_index);

        match self.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(&tx_info)?),
            _ => print_tx_info_text(&txid, &tx_info),
        }
        debug!("RPC errors encountered: {}", node.backend.get_error_count());
        Ok(())
    }
}

/// Parse raw hex, or fetch by txid when the input is one
pub fn load_transaction<F>(input: &str, fetch: F) -> AppResult<Transaction>
where
    F: FnOnce(&Txid) -> AppResult<Transaction>,
{
    let input = input.trim();
    if input.len() == 64 {
        if let Ok(txid) = input.parse::<Txid>() {
            debug!("Treating {} as a txid", input);
            return fetch(&txid);
        }
    }
    let bytes = hex::decode(input)?;
    bitcoin::consensus::deserialize(&bytes)
        .map_err(|e| AppError::InvalidData(format!("Failed to deserialise transaction: {}", e)))
}

/// Message type named by the first byte(s) of a payload
fn message_type_label(data: &[u8]) -> String {
    match unpack_message_type(data, TypeIdFormat::Short) {
        Some((id, _)) => match CounterpartyMessageType::from_u32(id) {
            Some(kind) => format!("{:?} ({})", kind, id),
            None => format!("unknown ({})", id),
        },
        None => "none".to_string(),
    }
}

fn print_tx_info_text(txid: &Txid, tx_info: &TxInfo) {
    println!("\n=== Transaction Info ===");
    println!("TXID: {}", txid);
    match tx_info {
        TxInfo::Payload(message) => {
            println!("Source:      {}", message.source);
            println!("Destination: {}", display_or_none(&message.destination));
            println!("BTC amount:  {}", message.btc_amount);
            println!("Fee:         {}", message.fee);
            println!("Message:     {}", message_type_label(&message.data));
            println!("Data ({} bytes):", message.data.len());
            println!("  {}", hex::encode(&message.data));
        }
        TxInfo::DispenserTrigger(trigger) => {
            println!("Dispenser trigger");
            println!("Source:      {}", trigger.source);
            println!("Destination: {}", display_or_none(&trigger.destination));
            println!("BTC amount:  {}", trigger.btc_amount);
            println!("Fee:         {}", trigger.fee);
            for out in &trigger.outs {
                println!(
                    "  [{}] {} <- {} sat",
                    out.out_index, out.destination, out.btc_amount
                );
            }
        }
        TxInfo::NotAProtocolTx => {
            println!("Not a Counterparty transaction");
        }
    }
}

fn display_or_none(value: &str) -> &str {
    if value.is_empty() {
        "(none)"
    } else {
        value
    }
}
