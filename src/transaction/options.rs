//! What to build and how
//!
//! [`TxRequest`] names the source, destinations and payload. [`ConstructOptions`]
//! holds the per-call knobs; [`ConstructOptions::from_config`] fills them from
//! the node's protocol defaults.

use crate::backend::Utxo;
use crate::config::ProtocolConfig;
use crate::encoding::EncodingChoice;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// A transaction to build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub source: String,
    /// Address and value; `None` pays the dust size for that kind of address
    #[serde(default)]
    pub destinations: Vec<(String, Option<u64>)>,
    /// Payload without the protocol prefix
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

impl TxRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destinations: Vec::new(),
            data: None,
        }
    }

    pub fn with_destination(mut self, address: impl Into<String>, value: Option<u64>) -> Self {
        self.destinations.push((address.into(), value));
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Public key placed in the third slot of multisig data outputs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DustReturnPubkey {
    /// The source's own public key
    #[default]
    Derive,
    /// `protocol.p2sh_dust_return_pubkey` from the node configuration
    NodeDefault,
    /// Hex encoded public key
    Explicit(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstructOptions {
    pub encoding: EncodingChoice,
    pub fee_per_kb: u64,
    pub estimate_fee_per_kb: bool,
    pub estimate_fee_conf_target: u16,
    pub regular_dust_size: u64,
    pub multisig_dust_size: u64,
    pub op_return_value: u64,
    /// Pay exactly this fee; 0 means unset
    pub exact_fee: Option<u64>,
    /// Minimum fee
    pub fee_provided: u64,
    /// Public keys to resolve pubkeyhash addresses with
    pub provided_pubkeys: Vec<String>,
    pub dust_return_pubkey: DustReturnPubkey,
    pub allow_unconfirmed_inputs: bool,
    /// Only spend outputs of this transaction
    pub unspent_tx_hash: Option<Txid>,
    /// Spend exactly these coins, in order, instead of asking the backend
    pub custom_inputs: Option<Vec<Utxo>>,
    pub disable_utxo_locks: bool,
    pub extended_tx_info: bool,
    /// Require a single hex result; `None` follows the node configuration
    pub old_style_api: Option<bool>,
    /// Build the P2SH pretx as a segwit transaction so both phases come back at once
    pub segwit: bool,
    pub p2sh_source_multisig_pubkeys: Option<Vec<String>>,
    pub p2sh_source_multisig_pubkeys_required: Option<u8>,
    /// Txid of the broadcast P2SH pretx to build the datatx on
    pub p2sh_pretx_txid: Option<Txid>,
}

impl ConstructOptions {
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self {
            encoding: EncodingChoice::Auto,
            fee_per_kb: config.default_fee_per_kb,
            estimate_fee_per_kb: config.estimate_fee_per_kb,
            estimate_fee_conf_target: config.estimate_fee_conf_target,
            regular_dust_size: config.default_regular_dust_size,
            multisig_dust_size: config.default_multisig_dust_size,
            op_return_value: config.default_op_return_value,
            exact_fee: None,
            fee_provided: 0,
            provided_pubkeys: Vec::new(),
            dust_return_pubkey: DustReturnPubkey::Derive,
            allow_unconfirmed_inputs: false,
            unspent_tx_hash: None,
            custom_inputs: None,
            disable_utxo_locks: false,
            extended_tx_info: false,
            old_style_api: None,
            segwit: false,
            p2sh_source_multisig_pubkeys: None,
            p2sh_source_multisig_pubkeys_required: None,
            p2sh_pretx_txid: None,
        }
    }

    pub(crate) fn exact_fee(&self) -> Option<u64> {
        self.exact_fee.filter(|fee| *fee > 0)
    }
}

impl Default for ConstructOptions {
    fn default() -> Self {
        Self::from_config(&ProtocolConfig::default())
    }
}
