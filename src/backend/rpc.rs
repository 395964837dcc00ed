use super::retry::{calculate_next_backoff, is_not_found_message};
use super::{sort_unspent_by_value, Backend, PretxStage, Utxo};
use crate::config::{BitcoinRpcConfig, Network};
use crate::errors::{BackendError, BackendResult, RpcError, RpcResult};
use bitcoin::{ScriptBuf, Transaction, Txid};
use corepc_client::client_sync::{v28::Client, Auth};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SATOSHIS_PER_BTC: f64 = 100_000_000.0;

/// Bitcoin Core backend over JSON-RPC with retry logic
///
/// Calls are synchronous; transient failures are retried with exponential
/// backoff, "not found" answers are returned immediately.
pub struct RpcBackend {
    client: Client,
    config: BitcoinRpcConfig,
    network: Network,
    pretx: PretxStage,
    error_count: AtomicU64,
}

impl RpcBackend {
    /// Create a client and check the node answers
    pub fn new(config: BitcoinRpcConfig, network: Network) -> RpcResult<Self> {
        let auth = Auth::UserPass(config.username.clone(), config.password.clone());
        let client = Client::new_with_auth(&config.url, auth).map_err(|e| {
            RpcError::ConnectionFailed(format!("Failed to create Bitcoin RPC client: {}", e))
        })?;

        client.get_blockchain_info().map_err(|e| {
            RpcError::ConnectionFailed(format!(
                "Failed to connect to Bitcoin RPC - check URL, credentials, and that Bitcoin Core is running: {}",
                e
            ))
        })?;
        info!("Bitcoin RPC connection established successfully");

        Ok(Self {
            client,
            config,
            network,
            pretx: PretxStage::default(),
            error_count: AtomicU64::new(0),
        })
    }

    /// Get the current error count from RPC operations
    pub fn get_error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Height of the node's chain tip
    pub fn get_block_count(&self) -> RpcResult<u32> {
        let count: Value = self.with_retry("getblockcount", |client| {
            client.call("getblockcount", &[]).map_err(|e| e.to_string())
        })?;
        count
            .as_u64()
            .and_then(|height| u32::try_from(height).ok())
            .ok_or_else(|| RpcError::DeserialisationFailed(format!("invalid block count {}", count)))
    }

    /// Run `call` until it succeeds, reports "not found", or retries run out
    fn with_retry<T, F>(&self, operation: &str, call: F) -> RpcResult<T>
    where
        F: Fn(&Client) -> Result<T, String>,
    {
        let mut attempts = 0;
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);

        loop {
            match call(&self.client) {
                Ok(value) => {
                    if attempts > 0 {
                        debug!("{} succeeded after {} attempts", operation, attempts + 1);
                    }
                    return Ok(value);
                }
                Err(message) => {
                    attempts += 1;
                    self.error_count.fetch_add(1, Ordering::Relaxed);

                    if is_not_found_message(&message) {
                        debug!("{}: not found (non-retryable): {}", operation, message);
                        return Err(RpcError::TransactionNotFound {
                            txid: operation.to_string(),
                        });
                    }

                    if attempts >= self.config.max_retries {
                        error!("{} failed after {} attempts: {}", operation, attempts, message);
                        return Err(RpcError::MaxRetriesExceeded {
                            operation: operation.to_string(),
                        });
                    }

                    warn!(
                        "RPC attempt {} failed for {}, retrying in {:?}: {}",
                        attempts, operation, backoff, message
                    );
                    sleep(backoff);
                    backoff = calculate_next_backoff(
                        backoff,
                        self.config.backoff_multiplier,
                        self.config.max_backoff_seconds,
                    );
                }
            }
        }
    }

    fn fetch_transaction(&self, txid: &Txid) -> RpcResult<Transaction> {
        let hex_tx = self.with_retry(&format!("getrawtransaction({})", txid), |client| {
            client
                .get_raw_transaction(*txid)
                .map(|raw| raw.0)
                .map_err(|e| e.to_string())
        })?;

        let tx_bytes = hex::decode(&hex_tx).map_err(|e| {
            RpcError::DeserialisationFailed(format!("Failed to decode raw transaction hex: {}", e))
        })?;
        bitcoin::consensus::deserialize(&tx_bytes).map_err(|e| {
            RpcError::DeserialisationFailed(format!("Failed to deserialise raw transaction: {}", e))
        })
    }
}

/// One `listunspent` entry
fn parse_unspent(entry: &Value) -> RpcResult<Utxo> {
    let field = |name: &str| {
        entry
            .get(name)
            .ok_or_else(|| RpcError::DeserialisationFailed(format!("listunspent entry without {}", name)))
    };

    let txid: Txid = field("txid")?
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RpcError::DeserialisationFailed("invalid txid in listunspent".to_string()))?;
    let vout = field("vout")?
        .as_u64()
        .ok_or_else(|| RpcError::DeserialisationFailed("invalid vout in listunspent".to_string()))?;
    let amount = field("amount")?
        .as_f64()
        .ok_or_else(|| RpcError::DeserialisationFailed("invalid amount in listunspent".to_string()))?;
    let confirmations = entry.get("confirmations").and_then(Value::as_u64).unwrap_or(0);
    let script_pub_key = entry
        .get("scriptPubKey")
        .and_then(Value::as_str)
        .and_then(|s| ScriptBuf::from_hex(s).ok());

    Ok(Utxo {
        txid,
        vout: vout as u32,
        amount: (amount * SATOSHIS_PER_BTC).round() as u64,
        confirmations: confirmations as u32,
        script_pub_key,
    })
}

impl Backend for RpcBackend {
    fn get_transaction(&self, txid: &Txid) -> BackendResult<Transaction> {
        if let Some(tx) = self.pretx.get(txid) {
            return Ok(tx);
        }
        self.fetch_transaction(txid).map_err(|e| match e {
            RpcError::TransactionNotFound { .. } => BackendError::TransactionNotFound(txid.to_string()),
            other => BackendError::Rpc(other),
        })
    }

    fn get_unspent_outputs(
        &self,
        address: &str,
        include_unconfirmed: bool,
        unspent_tx_hash: Option<&Txid>,
    ) -> BackendResult<Vec<Utxo>> {
        let min_conf = if include_unconfirmed { 0 } else { 1 };
        let entries: Vec<Value> = self.with_retry(&format!("listunspent({})", address), |client| {
            client
                .call("listunspent", &[json!(min_conf), json!(9_999_999), json!([address])])
                .map_err(|e| e.to_string())
        })?;

        let mut unspent = Vec::with_capacity(entries.len());
        for entry in &entries {
            let utxo = parse_unspent(entry)?;
            if unspent_tx_hash.map_or(true, |txid| utxo.txid == *txid) {
                unspent.push(utxo);
            }
        }
        Ok(unspent)
    }

    fn sort_unspent_outputs(&self, unspent: Vec<Utxo>, dust_size: u64) -> Vec<Utxo> {
        sort_unspent_by_value(unspent, dust_size, self.network == Network::Regtest)
    }

    fn estimate_fee_per_kb(&self, conf_target: u16, mode: &str) -> BackendResult<Option<u64>> {
        let estimate: Value = self.with_retry("estimatesmartfee", |client| {
            client
                .call("estimatesmartfee", &[json!(conf_target), json!(mode)])
                .map_err(|e| e.to_string())
        })?;
        Ok(estimate
            .get("feerate")
            .and_then(Value::as_f64)
            .map(|btc_per_kb| (btc_per_kb * SATOSHIS_PER_BTC).round() as u64))
    }

    fn cache_pretx(&self, txid: Txid, tx: Transaction) {
        self.pretx.put(txid, tx);
    }

    fn clear_pretx(&self, txid: &Txid) {
        self.pretx.remove(txid);
    }
}
