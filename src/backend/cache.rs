use super::Backend;
use crate::errors::{BackendError, BackendResult};
use bitcoin::{OutPoint, ScriptBuf, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// What the decoder needs to know about a spent output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prevout {
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    /// Whether the transaction that created the output carries witness data
    pub tx_is_segwit: bool,
}

/// Thread-safe read-through cache of previous outputs keyed by outpoint
///
/// The internal mutex is only held for map access; backend fetches happen
/// outside it.
#[derive(Clone, Default)]
pub struct PrevoutCache {
    cache: Arc<Mutex<HashMap<OutPoint, Prevout>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl PrevoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<Prevout> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(outpoint) {
            Some(prevout) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(prevout.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Record every output of `tx`
    pub fn put_transaction(&self, tx: &Transaction) {
        let txid = tx.compute_txid();
        let tx_is_segwit = tx.input.iter().any(|input| !input.witness.is_empty());
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        for (vout, output) in tx.output.iter().enumerate() {
            cache.insert(
                OutPoint {
                    txid,
                    vout: vout as u32,
                },
                Prevout {
                    value: output.value.to_sat(),
                    script_pubkey: output.script_pubkey.clone(),
                    tx_is_segwit,
                },
            );
        }
        debug!("Cached {} outputs of transaction {}", tx.output.len(), txid);
    }

    /// Look up `outpoint`, fetching its transaction from `backend` on a miss
    pub fn get_or_fetch(&self, backend: &dyn Backend, outpoint: &OutPoint) -> BackendResult<Prevout> {
        if let Some(prevout) = self.get(outpoint) {
            return Ok(prevout);
        }

        let tx = backend.get_transaction(&outpoint.txid)?;
        if outpoint.vout as usize >= tx.output.len() {
            return Err(BackendError::OutputNotFound {
                txid: outpoint.txid.to_string(),
                vout: outpoint.vout,
            });
        }
        self.put_transaction(&tx);

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(outpoint)
            .cloned()
            .ok_or_else(|| BackendError::OutputNotFound {
                txid: outpoint.txid.to_string(),
                vout: outpoint.vout,
            })
    }

    pub fn get_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
