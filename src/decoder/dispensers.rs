//! Dispenser triggers
//!
//! A transaction without protocol data can still pay an open dispenser.
//! Whether an address runs one is ledger state, so it is queried through
//! [`DispenserIndex`].

use crate::types::{DispenserOutput, DispenserTrigger, DISPENSE_ID};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Ledger view of open dispensers
pub trait DispenserIndex: Send + Sync {
    /// Would paying `btc_amount` to `address` trigger a dispense?
    fn is_dispensable(&self, address: &str, btc_amount: u64) -> bool;
}

/// No dispensers anywhere
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDispensers;

impl DispenserIndex for NoDispensers {
    fn is_dispensable(&self, _address: &str, _btc_amount: u64) -> bool {
        false
    }
}

/// In-memory dispenser table: address → satoshis per dispense
#[derive(Debug, Default)]
pub struct StaticDispensers {
    rates: RwLock<HashMap<String, u64>>,
}

impl StaticDispensers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, address: &str, satoshirate: u64) {
        self.rates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string(), satoshirate);
    }

    pub fn close(&self, address: &str) {
        self.rates.write().unwrap_or_else(|e| e.into_inner()).remove(address);
    }
}

impl DispenserIndex for StaticDispensers {
    fn is_dispensable(&self, address: &str, btc_amount: u64) -> bool {
        self.rates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .is_some_and(|rate| *rate > 0 && btc_amount >= *rate)
    }
}

/// Keep the candidate payments that hit an open dispenser, in output order
pub fn get_dispensers_outputs(
    index: &dyn DispenserIndex,
    potential_dispensers: &[Option<(String, u64)>],
) -> Vec<(String, u64)> {
    potential_dispensers
        .iter()
        .flatten()
        .filter(|(address, amount)| index.is_dispensable(address, *amount))
        .cloned()
        .collect()
}

/// Build the trigger for `dispensers_outputs`, paid from the first source
///
/// Payments back to the source are ignored. Without `multiple_dispenses`
/// only the first remaining payment counts; with it every one is listed in
/// `outs` and the last one fills the top-level fields. `None` when every
/// payment went back to the source.
pub fn build_dispenser_trigger(
    sources: &str,
    dispensers_outputs: &[(String, u64)],
    multiple_dispenses: bool,
) -> Option<DispenserTrigger> {
    let source = sources.split('-').next().unwrap_or_default();
    let mut trigger: Option<DispenserTrigger> = None;
    let mut outs = Vec::new();

    for (out_index, (destination, btc_amount)) in dispensers_outputs.iter().enumerate() {
        if destination == source {
            debug!("Ignoring dispenser payment back to {}", source);
            continue;
        }
        trigger = Some(DispenserTrigger {
            source: source.to_string(),
            destination: destination.clone(),
            btc_amount: *btc_amount,
            fee: 0,
            data: vec![DISPENSE_ID, 0x00],
            outs: Vec::new(),
        });
        if !multiple_dispenses {
            break;
        }
        outs.push(DispenserOutput {
            destination: destination.clone(),
            btc_amount: *btc_amount,
            out_index,
        });
    }

    trigger.map(|trigger| DispenserTrigger { outs, ..trigger })
}
