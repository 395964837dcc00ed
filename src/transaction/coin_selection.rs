//! Greedy coin selection
//!
//! Candidates come from the backend (or the caller), minus coins reserved in
//! the [`LockRegistry`], in the backend's preferred order. Coins are taken one
//! at a time until the inputs pay for the outputs and the fee, the change is
//! either zero or above dust, and enough inputs were taken.

use super::locks::LockRegistry;
use crate::backend::{Backend, Utxo};
use crate::encoding::{fee_for_size, EncodingScheme};
use crate::errors::{BalanceError, ConstructResult};
use crate::ledger::{ProtocolFlag, ProtocolFlags};
use bitcoin::Txid;
use tracing::debug;

/// Serialized bytes per (unsigned, pubkeyhash) input
pub const INPUT_SIZE: usize = 181;

/// Version, locktime and counts
pub const TX_OVERHEAD: usize = 10;

/// Attempts to reserve a selection before giving up on a contended source
const MAX_LOCK_ATTEMPTS: usize = 8;

/// Amounts and fee policy the inputs must cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTarget {
    pub destination_btc_out: u64,
    pub data_btc_out: u64,
    /// Output bytes counted towards the fee
    pub size_for_fee: usize,
    pub regular_dust_size: u64,
    pub desired_input_count: usize,
    pub fee_per_kb: u64,
    /// Fee to pay regardless of size
    pub exact_fee: Option<u64>,
    /// Minimum fee
    pub fee_provided: u64,
}

impl SelectionTarget {
    fn btc_out(&self) -> u64 {
        self.destination_btc_out + self.data_btc_out
    }

    fn fee_for_inputs(&self, input_count: usize) -> u64 {
        match self.exact_fee {
            Some(exact_fee) => exact_fee,
            None => {
                let size = INPUT_SIZE * input_count + self.size_for_fee + TX_OVERHEAD;
                self.fee_provided.max(fee_for_size(size, self.fee_per_kb))
            }
        }
    }
}

/// Chosen inputs with the resulting change and fee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    /// Change returned to the source; zero means no change output
    pub change: u64,
    pub btc_in: u64,
    pub fee: u64,
}

/// Everything one call to [`CoinSelector::select`] needs
#[derive(Debug, Clone)]
pub struct SelectionRequest<'a> {
    pub source: &'a str,
    pub scheme: EncodingScheme,
    pub chunk_count: usize,
    pub allow_unconfirmed_inputs: bool,
    pub unspent_tx_hash: Option<Txid>,
    pub custom_inputs: Option<&'a [Utxo]>,
    pub fee_per_kb: u64,
    pub estimate_fee_per_kb: bool,
    pub estimate_fee_conf_target: u16,
    pub exact_fee: Option<u64>,
    pub fee_provided: u64,
    pub size_for_fee: usize,
    pub destination_btc_out: u64,
    pub data_btc_out: u64,
    pub regular_dust_size: u64,
    pub multisig_dust_size: u64,
    pub disable_utxo_locks: bool,
}

fn insufficient(source: &str, needed: u64, allow_unconfirmed_inputs: bool) -> BalanceError {
    let mut message = format!(
        "Insufficient BTC at address {}. (Need approximately {} BTC.)",
        source,
        needed as f64 / 100_000_000.0
    );
    if !allow_unconfirmed_inputs {
        message.push_str(
            " To spend unconfirmed coins, use the flag `--unconfirmed`. \
             (Unconfirmed coins cannot be spent from multi\u{2010}sig addresses.)",
        );
    }
    BalanceError {
        address: source.to_string(),
        needed,
        message,
    }
}

/// Take `candidates` in order until `target` is covered
///
/// When the last candidate leaves a positive change below dust, that change
/// goes to the miners instead of failing.
pub fn pick_inputs(
    source: &str,
    candidates: &[Utxo],
    target: &SelectionTarget,
    allow_unconfirmed_inputs: bool,
) -> Result<Selection, BalanceError> {
    let btc_out = target.btc_out();
    let mut inputs = Vec::new();
    let mut btc_in = 0u64;
    let mut fee = target.fee_for_inputs(1);
    let mut change: i64 = 0;
    let mut sufficient = false;

    for (index, coin) in candidates.iter().enumerate() {
        debug!("New input: {}:{} ({} sat)", coin.txid, coin.vout, coin.amount);
        inputs.push(coin.clone());
        btc_in += coin.amount;

        fee = target.fee_for_inputs(inputs.len());
        change = btc_in as i64 - (btc_out + fee) as i64;
        debug!(
            "Inputs: {} fee: {} sat change: {} sat",
            inputs.len(),
            fee,
            change
        );

        let is_last = index + 1 == candidates.len();
        if is_last && change > 0 && (change as u64) < target.regular_dust_size {
            fee += change as u64;
            change = 0;
            sufficient = true;
        } else if change == 0 || change >= target.regular_dust_size as i64 {
            sufficient = true;
            if inputs.len() >= target.desired_input_count {
                break;
            }
        } else {
            sufficient = false;
        }
    }

    if !sufficient {
        let needed = btc_out + change.max(0) as u64 + fee;
        return Err(insufficient(source, needed, allow_unconfirmed_inputs));
    }

    Ok(Selection {
        inputs,
        change: change as u64,
        btc_in,
        fee,
    })
}

pub struct CoinSelector<'a> {
    backend: &'a dyn Backend,
    locks: &'a LockRegistry,
    flags: &'a dyn ProtocolFlags,
    estimate_fee_mode: &'a str,
}

impl<'a> CoinSelector<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        locks: &'a LockRegistry,
        flags: &'a dyn ProtocolFlags,
        estimate_fee_mode: &'a str,
    ) -> Self {
        Self {
            backend,
            locks,
            flags,
            estimate_fee_mode,
        }
    }

    /// Source coins that are neither reserved nor outputs of a pending pretx
    fn spendable(&self, source: &str, unspent: Vec<Utxo>) -> ConstructResult<Vec<Utxo>> {
        let locked = self.locks.locked_outpoints(source);
        let mut spendable = Vec::with_capacity(unspent.len());
        for utxo in unspent {
            if locked.contains(&utxo.outpoint()) || self.locks.is_pretx_output(self.backend, &utxo)? {
                debug!("Skipping locked input {}:{}", utxo.txid, utxo.vout);
                continue;
            }
            spendable.push(utxo);
        }
        Ok(spendable)
    }

    fn candidates(&self, request: &SelectionRequest<'_>) -> ConstructResult<Vec<Utxo>> {
        if let Some(custom_inputs) = request.custom_inputs {
            return Ok(custom_inputs.to_vec());
        }
        let unspent = self.backend.get_unspent_outputs(
            request.source,
            request.allow_unconfirmed_inputs,
            request.unspent_tx_hash.as_ref(),
        )?;
        let spendable = self.spendable(request.source, unspent)?;
        let dust = match request.scheme {
            EncodingScheme::Multisig => request.multisig_dust_size,
            _ => request.regular_dust_size,
        };
        Ok(self.backend.sort_unspent_outputs(spendable, dust))
    }

    /// Caller's rate, raised to the node's estimate when asked to
    fn fee_per_kb(&self, request: &SelectionRequest<'_>) -> ConstructResult<u64> {
        if !request.estimate_fee_per_kb {
            return Ok(request.fee_per_kb);
        }
        let estimate = self
            .backend
            .estimate_fee_per_kb(request.estimate_fee_conf_target, self.estimate_fee_mode)?;
        Ok(estimate.map_or(request.fee_per_kb, |estimate| estimate.max(request.fee_per_kb)))
    }

    fn desired_input_count(&self, request: &SelectionRequest<'_>) -> usize {
        if request.scheme == EncodingScheme::Multisig
            && request.chunk_count > 0
            && self.flags.enabled_now(ProtocolFlag::BytesPerSigop)
        {
            request.chunk_count * 2
        } else {
            1
        }
    }

    /// Pick, reserve and complete the inputs for `request`
    pub fn select(&self, request: &SelectionRequest<'_>) -> ConstructResult<Selection> {
        let fee_per_kb = self.fee_per_kb(request)?;
        debug!("Fee per kB: {} sat", fee_per_kb);
        let target = SelectionTarget {
            destination_btc_out: request.destination_btc_out,
            data_btc_out: request.data_btc_out,
            size_for_fee: request.size_for_fee,
            regular_dust_size: request.regular_dust_size,
            desired_input_count: self.desired_input_count(request),
            fee_per_kb,
            exact_fee: request.exact_fee,
            fee_provided: request.fee_provided,
        };

        for _ in 0..MAX_LOCK_ATTEMPTS {
            let candidates = self.candidates(request)?;
            let selection = pick_inputs(
                request.source,
                &candidates,
                &target,
                request.allow_unconfirmed_inputs,
            )?;

            let reserved = request.disable_utxo_locks
                || self.locks.try_lock(request.source, &selection.inputs)
                || request.custom_inputs.is_some();
            if !reserved {
                debug!("Inputs of {} were reserved concurrently, selecting again", request.source);
                continue;
            }

            return match self.backend.ensure_script_for_inputs(selection.inputs.clone()) {
                Ok(inputs) => Ok(Selection { inputs, ..selection }),
                Err(e) => {
                    if !request.disable_utxo_locks {
                        self.locks.unlock(request.source, &selection.inputs);
                    }
                    Err(e.into())
                }
            };
        }

        Err(BalanceError {
            address: request.source.to_string(),
            needed: request.destination_btc_out + request.data_btc_out,
            message: format!("Inputs of {} are contended by concurrent transactions", request.source),
        }
        .into())
    }

    /// Largest free coin of `source`, reserved unless locks are disabled
    ///
    /// Used as the extra input a P2SH source contributes to a datatx.
    pub fn select_any_coin_from_source(
        &self,
        source: &str,
        allow_unconfirmed_inputs: bool,
        regular_dust_size: u64,
        disable_utxo_locks: bool,
    ) -> ConstructResult<Option<Utxo>> {
        let unspent = self
            .backend
            .get_unspent_outputs(source, allow_unconfirmed_inputs, None)?;
        let spendable = self.spendable(source, unspent)?;
        for coin in self.backend.sort_unspent_outputs(spendable, regular_dust_size) {
            if disable_utxo_locks || self.locks.try_lock(source, std::slice::from_ref(&coin)) {
                return Ok(Some(coin));
            }
        }
        Ok(None)
    }
}
