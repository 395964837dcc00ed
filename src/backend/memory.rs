//! In-memory backend
//!
//! Holds transactions, per-address unspent sets and known public keys. Used by
//! the test suites and by the CLI when decoding offline.

use super::{Backend, PretxStage, Utxo};
use crate::config::Network;
use crate::errors::{AddressError, BackendError, BackendResult};
use crate::script::AddressCodec;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{
    absolute, transaction, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

pub struct MemoryBackend {
    codec: AddressCodec,
    transactions: RwLock<HashMap<Txid, Transaction>>,
    unspent: RwLock<HashMap<String, Vec<Utxo>>>,
    pubkeys: RwLock<HashMap<String, String>>,
    fee_estimate: RwLock<Option<u64>>,
    pretx: PretxStage,
    funding_counter: AtomicU64,
}

impl MemoryBackend {
    pub fn new(network: Network) -> Self {
        Self {
            codec: AddressCodec::new(network),
            transactions: RwLock::new(HashMap::new()),
            unspent: RwLock::new(HashMap::new()),
            pubkeys: RwLock::new(HashMap::new()),
            fee_estimate: RwLock::new(None),
            pretx: PretxStage::default(),
            funding_counter: AtomicU64::new(0),
        }
    }

    pub fn add_transaction(&self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        self.transactions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(txid, tx);
        txid
    }

    pub fn add_utxo(&self, address: &str, utxo: Utxo) {
        self.unspent
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(address.to_string())
            .or_default()
            .push(utxo);
    }

    /// Create a funding transaction paying `amount` to `address` and register its output
    pub fn fund(&self, address: &str, amount: u64, confirmations: u32) -> Result<Utxo, AddressError> {
        let script_pubkey = self.codec.address_to_script(address)?;
        let n = self.funding_counter.fetch_add(1, Ordering::Relaxed);
        let seed = sha256::Hash::hash(format!("funding-{}", n).as_bytes());

        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array(seed.to_byte_array()),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(amount),
                script_pubkey: script_pubkey.clone(),
            }],
        };
        let txid = self.add_transaction(tx);

        let utxo = Utxo {
            txid,
            vout: 0,
            amount,
            confirmations,
            script_pub_key: Some(script_pubkey),
        };
        self.add_utxo(address, utxo.clone());
        Ok(utxo)
    }

    /// Remember the public key behind its P2PKH (and P2WPKH) address
    pub fn add_pubkey(&self, pubkey_hex: &str) -> Result<String, AddressError> {
        let bytes = hex::decode(pubkey_hex).map_err(|_| AddressError::InvalidPubkey(pubkey_hex.to_string()))?;
        let address = self.codec.pubkey_to_pubkeyhash(&bytes);
        self.pubkeys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.clone(), pubkey_hex.to_string());
        Ok(address)
    }

    pub fn set_fee_estimate(&self, fee_per_kb: Option<u64>) {
        *self.fee_estimate.write().unwrap_or_else(|e| e.into_inner()) = fee_per_kb;
    }

    /// Mark an outpoint as spent
    pub fn spend(&self, outpoint: &OutPoint) {
        let mut unspent = self.unspent.write().unwrap_or_else(|e| e.into_inner());
        for utxos in unspent.values_mut() {
            utxos.retain(|utxo| utxo.outpoint() != *outpoint);
        }
    }
}

impl Backend for MemoryBackend {
    fn get_transaction(&self, txid: &Txid) -> BackendResult<Transaction> {
        if let Some(tx) = self.pretx.get(txid) {
            return Ok(tx);
        }
        self.transactions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(txid)
            .cloned()
            .ok_or_else(|| BackendError::TransactionNotFound(txid.to_string()))
    }

    fn get_unspent_outputs(
        &self,
        address: &str,
        include_unconfirmed: bool,
        unspent_tx_hash: Option<&Txid>,
    ) -> BackendResult<Vec<Utxo>> {
        let unspent = self.unspent.read().unwrap_or_else(|e| e.into_inner());
        Ok(unspent
            .get(address)
            .map(|utxos| {
                utxos
                    .iter()
                    .filter(|utxo| include_unconfirmed || utxo.confirmations > 0)
                    .filter(|utxo| unspent_tx_hash.map_or(true, |txid| utxo.txid == *txid))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn estimate_fee_per_kb(&self, _conf_target: u16, _mode: &str) -> BackendResult<Option<u64>> {
        Ok(*self.fee_estimate.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn find_pubkey(&self, address: &str) -> BackendResult<Option<String>> {
        Ok(self
            .pubkeys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned())
    }

    fn cache_pretx(&self, txid: Txid, tx: Transaction) {
        self.pretx.put(txid, tx);
    }

    fn clear_pretx(&self, txid: &Txid) {
        self.pretx.remove(txid);
    }
}
