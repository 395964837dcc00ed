//! Chain backend collaborators
//!
//! - **Backend** - the narrow interface the decoder and the constructor need
//!   from a node: raw transactions, unspent outputs, fee estimates and a
//!   staging area for not-yet-broadcast P2SH pretxs
//! - **Cache** - read-through previous-output cache keyed by outpoint
//! - **Rpc** - Bitcoin Core JSON-RPC implementation with retry/backoff
//! - **Memory** - in-memory implementation for tests and offline use

pub mod cache;
pub mod memory;
pub mod retry;
pub mod rpc;

pub use cache::{CacheStats, Prevout, PrevoutCache};
pub use memory::MemoryBackend;
pub use retry::calculate_next_backoff;
pub use rpc::RpcBackend;

use crate::errors::{BackendError, BackendResult};
use bitcoin::consensus::encode::serialize;
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// An unspent output owned by an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Value in satoshis
    pub amount: u64,
    #[serde(default)]
    pub confirmations: u32,
    /// Filled in lazily by [`Backend::ensure_script_for_inputs`]
    #[serde(default)]
    pub script_pub_key: Option<ScriptBuf>,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

/// Node access consumed by the codec
pub trait Backend: Send + Sync {
    /// Fetch a transaction, including staged pretxs
    fn get_transaction(&self, txid: &Txid) -> BackendResult<Transaction>;

    fn get_raw_transaction(&self, txid: &Txid) -> BackendResult<Vec<u8>> {
        Ok(serialize(&self.get_transaction(txid)?))
    }

    /// Unspent outputs of `address`, optionally restricted to the outputs of one transaction
    fn get_unspent_outputs(
        &self,
        address: &str,
        include_unconfirmed: bool,
        unspent_tx_hash: Option<&Txid>,
    ) -> BackendResult<Vec<Utxo>>;

    /// Drop dust and order candidates for coin selection
    fn sort_unspent_outputs(&self, unspent: Vec<Utxo>, dust_size: u64) -> Vec<Utxo> {
        sort_unspent_by_value(unspent, dust_size, false)
    }

    /// Fee estimate in satoshis per kilobyte, `None` when the node has no estimate
    fn estimate_fee_per_kb(&self, conf_target: u16, mode: &str) -> BackendResult<Option<u64>>;

    /// Make sure every input carries its output script
    fn ensure_script_for_inputs(&self, inputs: Vec<Utxo>) -> BackendResult<Vec<Utxo>> {
        inputs
            .into_iter()
            .map(|mut utxo| {
                if utxo.script_pub_key.is_none() {
                    let tx = self.get_transaction(&utxo.txid)?;
                    let output = tx.output.get(utxo.vout as usize).ok_or_else(|| {
                        BackendError::OutputNotFound {
                            txid: utxo.txid.to_string(),
                            vout: utxo.vout,
                        }
                    })?;
                    utxo.script_pub_key = Some(output.script_pubkey.clone());
                }
                Ok(utxo)
            })
            .collect()
    }

    /// Public key (hex) revealed on chain for `address`, if the backend knows one
    fn find_pubkey(&self, _address: &str) -> BackendResult<Option<String>> {
        Ok(None)
    }

    /// Make an unbroadcast pretx visible to [`Backend::get_transaction`]
    fn cache_pretx(&self, txid: Txid, tx: Transaction);

    fn clear_pretx(&self, txid: &Txid);
}

/// Filter out outputs at or below `dust_size` and sort largest first
///
/// With `by_confirmations` the most confirmed outputs come first (regtest
/// nodes hold many immature coinbase outputs).
pub fn sort_unspent_by_value(unspent: Vec<Utxo>, dust_size: u64, by_confirmations: bool) -> Vec<Utxo> {
    let mut unspent: Vec<Utxo> = unspent
        .into_iter()
        .filter(|utxo| utxo.amount > dust_size)
        .collect();
    if by_confirmations {
        unspent.sort_by(|a, b| (b.confirmations, b.amount).cmp(&(a.confirmations, a.amount)));
    } else {
        unspent.sort_by(|a, b| b.amount.cmp(&a.amount));
    }
    unspent
}

/// Staging area for pretxs that are not on chain yet
#[derive(Debug, Default)]
pub struct PretxStage {
    staged: Mutex<HashMap<Txid, Transaction>>,
}

impl PretxStage {
    pub fn put(&self, txid: Txid, tx: Transaction) {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(txid, tx);
    }

    pub fn get(&self, txid: &Txid) -> Option<Transaction> {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(txid)
            .cloned()
    }

    pub fn remove(&self, txid: &Txid) {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(txid);
    }
}
