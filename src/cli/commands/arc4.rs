use crate::config::AppConfig;
use crate::crypto::Obfuscator;
use crate::errors::{AppError, AppResult};
use anyhow::{Context, Result};
use bitcoin::Txid;
use clap::Args;
use tracing::info;

/// Deobfuscate bytes with the ARC4 key of a transaction
#[derive(Args)]
pub struct Arc4Command {
    /// Txid spent by the transaction's first input (the key)
    pub txid: String,

    /// Obfuscated bytes as hex
    pub data: String,

    /// Output format: text, hex
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Deobfuscated bytes and, when present, the payload after the protocol prefix
#[derive(Debug)]
pub struct Arc4Result {
    pub key_txid: Txid,
    pub decrypted: Vec<u8>,
    pub payload: Option<Vec<u8>>,
}

/// ARC4 is symmetric, so this also obfuscates
pub fn deobfuscate(txid: &str, data_hex: &str, prefix: &[u8]) -> Result<Arc4Result> {
    let key_txid: Txid = txid
        .trim()
        .parse()
        .with_context(|| format!("Invalid txid {}", txid))?;
    let data = hex::decode(data_hex.trim()).context("Data is not valid hex")?;
    anyhow::ensure!(!data.is_empty(), "Nothing to deobfuscate");

    let decrypted = Obfuscator::for_first_input(&key_txid).decrypt(&data);
    let payload = find_prefix(&decrypted, prefix).map(|offset| decrypted[offset + prefix.len()..].to_vec());

    Ok(Arc4Result {
        key_txid,
        decrypted,
        payload,
    })
}

/// Offset of `prefix` in `data`
///
/// Multisig and pubkeyhash chunks carry a length byte ahead of the prefix.
fn find_prefix(data: &[u8], prefix: &[u8]) -> Option<usize> {
    if prefix.is_empty() || data.len() < prefix.len() {
        return None;
    }
    data.windows(prefix.len()).position(|window| window == prefix)
}

impl Arc4Command {
    pub fn run(&self) -> AppResult<()> {
        info!("ARC4 deobfuscation with key from {}", self.txid);
        let config = AppConfig::get_defaults();

        let result = deobfuscate(&self.txid, &self.data, config.protocol.prefix_bytes())
            .map_err(|e| AppError::InvalidData(format!("{:#}", e)))?;

        match self.format.as_str() {
            "hex" => println!("{}", hex::encode(&result.decrypted)),
            _ => print_arc4_text(&result),
        }
        Ok(())
    }
}

fn print_arc4_text(result: &Arc4Result) {
    println!("\n=== ARC4 Deobfuscation ===");
    println!("Key (first input txid): {}", result.key_txid);
    println!("Decrypted ({} bytes):", result.decrypted.len());
    println!("  {}", hex::encode(&result.decrypted));
    println!("  ASCII: {}", to_ascii_preview(&result.decrypted, 80));
    match &result.payload {
        Some(payload) => {
            println!("Counterparty payload ({} bytes):", payload.len());
            println!("  {}", hex::encode(payload));
        }
        None => println!("Counterparty prefix not found"),
    }
}

/// Printable ASCII, with `.` for everything else
fn to_ascii_preview(data: &[u8], max_len: usize) -> String {
    data.iter()
        .take(max_len)
        .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
        .collect()
}
