//! Protocol upgrade gates
//!
//! Every consensus change is keyed by block height: a transaction must always
//! be interpreted with the rules that were active at its own height, never the
//! node's current rules. [`ProtocolFlags`] is the query the decoder and the
//! constructor depend on; [`ProtocolChanges`] is the table-backed
//! implementation shipped with the crate.

use crate::config::Network;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Named protocol changes consulted by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFlag {
    MultisigAddresses,
    P2shAddresses,
    P2shDispensersSupport,
    CorrectSegwitTxids,
    SegwitSupport,
    FirstInputIsSource,
    P2shEncoding,
    PrevoutSegwitFix,
    Dispensers,
    MultipleDispenses,
    BytesPerSigop,
}

impl ProtocolFlag {
    pub const ALL: [ProtocolFlag; 11] = [
        ProtocolFlag::MultisigAddresses,
        ProtocolFlag::P2shAddresses,
        ProtocolFlag::P2shDispensersSupport,
        ProtocolFlag::CorrectSegwitTxids,
        ProtocolFlag::SegwitSupport,
        ProtocolFlag::FirstInputIsSource,
        ProtocolFlag::P2shEncoding,
        ProtocolFlag::PrevoutSegwitFix,
        ProtocolFlag::Dispensers,
        ProtocolFlag::MultipleDispenses,
        ProtocolFlag::BytesPerSigop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProtocolFlag::MultisigAddresses => "multisig_addresses",
            ProtocolFlag::P2shAddresses => "p2sh_addresses",
            ProtocolFlag::P2shDispensersSupport => "p2sh_dispensers_support",
            ProtocolFlag::CorrectSegwitTxids => "correct_segwit_txids",
            ProtocolFlag::SegwitSupport => "segwit_support",
            ProtocolFlag::FirstInputIsSource => "first_input_is_source",
            ProtocolFlag::P2shEncoding => "p2sh_encoding",
            ProtocolFlag::PrevoutSegwitFix => "prevout_segwit_fix",
            ProtocolFlag::Dispensers => "dispensers",
            ProtocolFlag::MultipleDispenses => "multiple_dispenses",
            ProtocolFlag::BytesPerSigop => "bytespersigop",
        }
    }
}

impl fmt::Display for ProtocolFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProtocolFlag::ALL
            .iter()
            .copied()
            .find(|flag| flag.name() == s)
            .ok_or_else(|| format!("unknown protocol flag: {}", s))
    }
}

/// Capability query: is `flag` active at `block_index`?
pub trait ProtocolFlags: Send + Sync {
    fn enabled(&self, flag: ProtocolFlag, block_index: u32) -> bool;

    /// Height of the chain tip as last seen by the node
    fn current_block_index(&self) -> u32;

    fn enabled_now(&self, flag: ProtocolFlag) -> bool {
        self.enabled(flag, self.current_block_index())
    }
}

lazy_static! {
    // Mainnet activation heights
    static ref MAINNET_ACTIVATIONS: HashMap<ProtocolFlag, u32> = {
        let mut m = HashMap::new();
        m.insert(ProtocolFlag::MultisigAddresses, 333_500);
        m.insert(ProtocolFlag::BytesPerSigop, 435_000);
        m.insert(ProtocolFlag::P2shAddresses, 479_000);
        m.insert(ProtocolFlag::SegwitSupport, 557_236);
        m.insert(ProtocolFlag::P2shEncoding, 2_000_000);
        m.insert(ProtocolFlag::Dispensers, 624_000);
        m.insert(ProtocolFlag::FirstInputIsSource, 626_000);
        m.insert(ProtocolFlag::CorrectSegwitTxids, 662_000);
        m.insert(ProtocolFlag::PrevoutSegwitFix, 662_000);
        m.insert(ProtocolFlag::MultipleDispenses, 753_500);
        m.insert(ProtocolFlag::P2shDispensersSupport, 724_000);
        m
    };

    // Testnet activation heights
    static ref TESTNET_ACTIVATIONS: HashMap<ProtocolFlag, u32> = {
        let mut m = HashMap::new();
        m.insert(ProtocolFlag::MultisigAddresses, 0);
        m.insert(ProtocolFlag::BytesPerSigop, 0);
        m.insert(ProtocolFlag::P2shAddresses, 0);
        m.insert(ProtocolFlag::SegwitSupport, 1_440_200);
        m.insert(ProtocolFlag::P2shEncoding, 1_440_200);
        m.insert(ProtocolFlag::Dispensers, 1_666_625);
        m.insert(ProtocolFlag::FirstInputIsSource, 1_666_625);
        m.insert(ProtocolFlag::CorrectSegwitTxids, 1_666_625);
        m.insert(ProtocolFlag::PrevoutSegwitFix, 1_666_625);
        m.insert(ProtocolFlag::MultipleDispenses, 2_420_000);
        m.insert(ProtocolFlag::P2shDispensersSupport, 2_163_328);
        m
    };
}

/// Table-backed [`ProtocolFlags`]
///
/// Regtest activates every change at height 0. Activation heights can be
/// overridden per flag (config `protocol_changes` section).
#[derive(Debug)]
pub struct ProtocolChanges {
    activations: HashMap<ProtocolFlag, u32>,
    current_block_index: AtomicU32,
}

impl ProtocolChanges {
    pub fn new(network: Network) -> Self {
        let activations = match network {
            Network::Mainnet => MAINNET_ACTIVATIONS.clone(),
            Network::Testnet => TESTNET_ACTIVATIONS.clone(),
            Network::Regtest => ProtocolFlag::ALL.iter().map(|f| (*f, 0)).collect(),
        };
        Self {
            activations,
            current_block_index: AtomicU32::new(0),
        }
    }

    /// Apply `flag name -> activation height` overrides; unknown names are rejected
    pub fn with_overrides(mut self, overrides: &HashMap<String, u32>) -> Result<Self, String> {
        for (name, height) in overrides {
            let flag = ProtocolFlag::from_str(name)?;
            self.activations.insert(flag, *height);
        }
        Ok(self)
    }

    /// Disable a flag entirely
    pub fn without(mut self, flag: ProtocolFlag) -> Self {
        self.activations.remove(&flag);
        self
    }

    pub fn activation_height(&self, flag: ProtocolFlag) -> Option<u32> {
        self.activations.get(&flag).copied()
    }

    pub fn set_current_block_index(&self, block_index: u32) {
        self.current_block_index.store(block_index, Ordering::Relaxed);
    }
}

impl ProtocolFlags for ProtocolChanges {
    fn enabled(&self, flag: ProtocolFlag, block_index: u32) -> bool {
        self.activations
            .get(&flag)
            .is_some_and(|activation| block_index >= *activation)
    }

    fn current_block_index(&self) -> u32 {
        self.current_block_index.load(Ordering::Relaxed)
    }
}
