//! Advisory UTXO locks
//!
//! Coins picked by one `construct` call stay reserved for a short while so a
//! concurrent call for the same source picks different ones. Outputs of P2SH
//! pretxs that were handed out but not broadcast yet are reserved too; those
//! are keyed by [`make_outkey_vin`] because the pretx txid is not final until
//! it is signed.
//!
//! Locks are in-process and time bounded. They narrow the double-spend window
//! between concurrent calls but cannot close it.

use crate::backend::{Backend, Utxo};
use crate::config::{P2shLocksConfig, UtxoLocksConfig};
use crate::errors::{BackendError, BackendResult};
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Transaction};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::hash::Hash as StdHash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Pretx output identity: sha256 over the pretx input outpoints and the output index
pub type Outkey = [u8; 32];

struct Timed<V> {
    value: V,
    created_at: Instant,
}

/// Size-bounded map whose entries expire `ttl` after insertion
///
/// Expired entries are dropped on every write. When full, inserting a new key
/// evicts the oldest entry.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, Timed<V>>>,
    max_size: usize,
    ttl: Duration,
}

impl<K: Eq + StdHash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size,
            ttl,
        }
    }

    fn live(&self, timed: &Timed<V>, now: Instant) -> bool {
        now.duration_since(timed.created_at) < self.ttl
    }

    fn make_room(&self, entries: &mut HashMap<K, Timed<V>>, key: &K) {
        let now = Instant::now();
        entries.retain(|_, timed| now.duration_since(timed.created_at) < self.ttl);
        if entries.contains_key(key) {
            return;
        }
        while !entries.is_empty() && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, timed)| timed.created_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => {
                    entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|timed| self.live(timed, now))
            .map(|timed| timed.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&self, key: K, value: V) {
        if self.max_size == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.make_room(&mut entries, &key);
        entries.insert(
            key,
            Timed {
                value,
                created_at: Instant::now(),
            },
        );
    }

    /// Live value for `key`, inserting `make()` first when there is none
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timed) = entries.get(&key).filter(|timed| self.live(timed, now)) {
            return timed.value.clone();
        }
        let value = make();
        if self.max_size > 0 {
            self.make_room(&mut entries, &key);
            entries.insert(
                key,
                Timed {
                    value: value.clone(),
                    created_at: now,
                },
            );
        }
        value
    }

    /// Insert every key, or none of them if one is already present
    pub fn insert_all_if_absent(&self, keys: &[K], value: V) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if keys
            .iter()
            .any(|key| entries.get(key).is_some_and(|timed| self.live(timed, now)))
        {
            return false;
        }
        for key in keys {
            self.make_room(&mut entries, key);
            entries.insert(
                key.clone(),
                Timed {
                    value: value.clone(),
                    created_at: now,
                },
            );
        }
        true
    }

    pub fn remove(&self, key: &K) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Keys of the live entries
    pub fn keys(&self) -> Vec<K> {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, timed)| self.live(timed, now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type AddressLocks = Arc<TtlCache<OutPoint, ()>>;

/// Reserved coins, per source address, plus reserved pretx outputs
///
/// Owned by the service that runs `construct`; cloning is not supported, share
/// it behind an `Arc`.
pub struct LockRegistry {
    /// `None` when UTXO locking is disabled (`max_addresses = 0`)
    utxo_locks: Option<TtlCache<String, AddressLocks>>,
    per_address_max_size: usize,
    max_age: Duration,
    pretx_locks: TtlCache<Outkey, ()>,
    outkeys: TtlCache<OutPoint, Outkey>,
}

impl LockRegistry {
    pub fn new(utxo: &UtxoLocksConfig, p2sh: &P2shLocksConfig) -> Self {
        let max_age = Duration::from_secs_f64(utxo.max_age_secs.max(0.0));
        let utxo_locks = (utxo.max_addresses > 0).then(|| TtlCache::new(utxo.max_addresses, max_age));
        Self {
            utxo_locks,
            per_address_max_size: utxo.per_address_max_size,
            max_age,
            pretx_locks: TtlCache::new(p2sh.max_size, Duration::from_secs(p2sh.ttl_secs)),
            outkeys: TtlCache::new(
                p2sh.outkey_cache_size,
                Duration::from_secs(p2sh.outkey_cache_ttl_secs),
            ),
        }
    }

    pub fn utxo_locks_enabled(&self) -> bool {
        self.utxo_locks.is_some()
    }

    fn address_locks(&self, address: &str) -> Option<AddressLocks> {
        let locks = self.utxo_locks.as_ref()?;
        let (size, max_age) = (self.per_address_max_size, self.max_age);
        Some(locks.get_or_insert_with(address.to_string(), || Arc::new(TtlCache::new(size, max_age))))
    }

    /// Outpoints of `address` currently reserved
    pub fn locked_outpoints(&self, address: &str) -> HashSet<OutPoint> {
        let Some(locks) = self.utxo_locks.as_ref() else {
            return HashSet::new();
        };
        locks
            .get(&address.to_string())
            .map(|address_locks| address_locks.keys().into_iter().collect())
            .unwrap_or_default()
    }

    /// Reserve `inputs` for `address`
    ///
    /// All or nothing: `false` if another caller holds one of them.
    pub fn try_lock(&self, address: &str, inputs: &[Utxo]) -> bool {
        let Some(address_locks) = self.address_locks(address) else {
            return true;
        };
        let outpoints: Vec<OutPoint> = inputs.iter().map(Utxo::outpoint).collect();
        let locked = address_locks.insert_all_if_absent(&outpoints, ());
        if locked {
            debug!("Locked {} inputs of {}", outpoints.len(), address);
        }
        locked
    }

    pub fn unlock(&self, address: &str, inputs: &[Utxo]) {
        let Some(locks) = self.utxo_locks.as_ref() else {
            return;
        };
        if let Some(address_locks) = locks.get(&address.to_string()) {
            for input in inputs {
                address_locks.remove(&input.outpoint());
            }
            debug!("Unlocked {} inputs of {}", inputs.len(), address);
        }
    }

    /// Reserve the first `datatx_inputs` outputs of an unbroadcast pretx
    ///
    /// Those are the outputs its datatx spends: the data outputs and, when
    /// destinations carry value, the source value output. Change is left
    /// free for the next construction.
    pub fn lock_pretx(&self, pretx: &Transaction, datatx_inputs: usize) {
        for vout in 0..datatx_inputs.min(pretx.output.len()) {
            self.pretx_locks.insert(make_outkey_vin(pretx, vout as u32), ());
        }
    }

    pub fn has_pretx_locks(&self) -> bool {
        !self.pretx_locks.is_empty()
    }

    pub fn is_pretx_locked(&self, outkey: &Outkey) -> bool {
        self.pretx_locks.contains(outkey)
    }

    /// Outkey of `outpoint`, fetching its transaction on a cache miss
    pub fn outkey_for(&self, backend: &dyn Backend, outpoint: &OutPoint) -> BackendResult<Outkey> {
        if let Some(outkey) = self.outkeys.get(outpoint) {
            return Ok(outkey);
        }
        let tx = backend.get_transaction(&outpoint.txid)?;
        if outpoint.vout as usize >= tx.output.len() {
            return Err(BackendError::OutputNotFound {
                txid: outpoint.txid.to_string(),
                vout: outpoint.vout,
            });
        }
        let outkey = make_outkey_vin(&tx, outpoint.vout);
        self.outkeys.insert(*outpoint, outkey);
        Ok(outkey)
    }

    /// Is `utxo` reserved as the output of a pretx we handed out?
    pub fn is_pretx_output(&self, backend: &dyn Backend, utxo: &Utxo) -> BackendResult<bool> {
        if !self.has_pretx_locks() {
            return Ok(false);
        }
        Ok(self.is_pretx_locked(&self.outkey_for(backend, &utxo.outpoint())?))
    }
}

/// Identity of output `vout` of `tx` that does not depend on input signatures
pub fn make_outkey_vin(tx: &Transaction, vout: u32) -> Outkey {
    let mut hasher = Sha256::new();
    for input in &tx.input {
        hasher.update(input.previous_output.txid.to_byte_array());
        hasher.update(input.previous_output.vout.to_le_bytes());
    }
    hasher.update(vout.to_le_bytes());
    hasher.finalize().into()
}
