//! Transaction construction
//!
//! `construct` turns a [`TxRequest`] into unsigned transaction hex:
//! 1. validate the source and destinations, expanding multisig arrays
//! 2. pick the encoding and the dust return public key
//! 3. split the payload and size the outputs
//! 4. select (and reserve) inputs
//! 5. serialise, in two phases for P2SH
//! 6. decode the result and compare it with the request
//!
//! A transaction that does not decode back to the request is never returned;
//! its inputs are released before the error propagates.

use super::coin_selection::{CoinSelector, Selection, SelectionRequest};
use super::locks::LockRegistry;
use super::options::{ConstructOptions, DustReturnPubkey, TxRequest};
use crate::backend::{Backend, Utxo};
use crate::config::{AppConfig, ProtocolConfig};
use crate::decoder::{DispenserIndex, TxInfoExtractor};
use crate::encoding::p2sh::{calculate_outputs, maximum_data_chunk_size, DataOwner};
use crate::encoding::{
    chunks, DataOutput, EncodingChoice, EncodingScheme, Serializer, MULTISIG_CHUNK_SIZE, PUBKEYHASH_CHUNK_SIZE,
};
use crate::errors::{BackendError, ConstructResult, TransactionError};
use crate::ledger::{ProtocolFlag, ProtocolFlags};
use crate::script::address::is_pubkey_hex;
use crate::script::AddressCodec;
use crate::types::TxInfo;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bytes of a pubkeyhash output
const P2PKH_OUTPUT_SIZE: usize = 25 + 9;

/// Bytes of a 1-of-3 multisig data output
const MULTISIG_OUTPUT_SIZE: usize = 81;

/// Amounts of the constructed transaction next to its hex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedTxInfo {
    pub btc_in: u64,
    pub btc_out: u64,
    pub btc_change: u64,
    pub btc_fee: u64,
    pub tx_hex: String,
}

/// What `construct` hands back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstructOutput {
    Hex(String),
    /// P2SH pretx and datatx, in that order
    Hexes(Vec<String>),
    Extended(ExtendedTxInfo),
}

impl ConstructOutput {
    /// Every transaction hex in the output
    pub fn hexes(&self) -> Vec<&str> {
        match self {
            ConstructOutput::Hex(hex) => vec![hex.as_str()],
            ConstructOutput::Hexes(hexes) => hexes.iter().map(String::as_str).collect(),
            ConstructOutput::Extended(info) => vec![info.tx_hex.as_str()],
        }
    }
}

/// Collapse the produced hexes; the old API only ever returns one
pub fn return_result(hexes: Vec<Option<String>>, old_style_api: bool) -> Result<ConstructOutput, TransactionError> {
    let mut hexes: Vec<String> = hexes.into_iter().flatten().collect();
    if old_style_api && hexes.len() != 1 {
        return Err(TransactionError::OldStyleApiMultipleTxs);
    }
    if hexes.len() == 1 {
        return Ok(ConstructOutput::Hex(hexes.swap_remove(0)));
    }
    Ok(ConstructOutput::Hexes(hexes))
}

/// Request after validation and normalisation
struct Plan {
    /// Source with multisig arrays expanded to public keys
    source_address: String,
    scheme: Option<EncodingScheme>,
    destinations: Vec<(String, u64)>,
    destination_btc_out: u64,
    dust_return_pubkey: Option<Vec<u8>>,
    owner: Option<DataOwner>,
    data_chunks: Vec<Vec<u8>>,
    data_value: u64,
    data_btc_out: u64,
    size_for_fee: usize,
    exact_fee: Option<u64>,
}

/// Everything built so far, waiting for the self-check
struct Built {
    tx: Transaction,
    pretx: Option<Transaction>,
    pretx_txid: Option<Txid>,
    selection: Option<Selection>,
    /// Extra coin a P2SH source put into the datatx
    source_input: Option<Utxo>,
}

pub struct TransactionService {
    protocol: ProtocolConfig,
    codec: AddressCodec,
    backend: Arc<dyn Backend>,
    flags: Arc<dyn ProtocolFlags>,
    locks: LockRegistry,
    extractor: TxInfoExtractor,
}

impl TransactionService {
    pub fn new(config: &AppConfig, backend: Arc<dyn Backend>, flags: Arc<dyn ProtocolFlags>) -> Self {
        let extractor = TxInfoExtractor::new(
            config.network,
            config.protocol.prefix_bytes(),
            Arc::clone(&flags),
            Arc::clone(&backend),
        );
        Self {
            protocol: config.protocol.clone(),
            codec: AddressCodec::new(config.network),
            backend,
            flags,
            locks: LockRegistry::new(&config.utxo_locks, &config.p2sh_locks),
            extractor,
        }
    }

    pub fn with_dispensers(mut self, dispensers: Arc<dyn DispenserIndex>) -> Self {
        self.extractor = self.extractor.with_dispensers(dispensers);
        self
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn extractor(&self) -> &TxInfoExtractor {
        &self.extractor
    }

    /// Options filled from this node's protocol defaults
    pub fn default_options(&self) -> ConstructOptions {
        ConstructOptions::from_config(&self.protocol)
    }

    fn prefix(&self) -> &[u8] {
        self.protocol.prefix_bytes()
    }

    fn selector(&self) -> CoinSelector<'_> {
        CoinSelector::new(
            self.backend.as_ref(),
            &self.locks,
            self.flags.as_ref(),
            &self.protocol.estimate_fee_mode,
        )
    }

    /// Public key of a pubkeyhash address: provided keys first, then the chain
    fn resolve_pubkey(&self, address: &str, provided: &[String]) -> ConstructResult<String> {
        if let Some(pubkey) = self.codec.pubkeyhash_to_pubkey(address, provided) {
            return Ok(pubkey);
        }
        self.backend
            .find_pubkey(address)?
            .ok_or_else(|| BackendError::PubkeyNotFound(address.to_string()).into())
    }

    fn expand_multisig(&self, address: &str, provided: &[String]) -> ConstructResult<String> {
        self.codec
            .multisig_pubkeyhashes_to_pubkeys(address, |item| self.resolve_pubkey(item, provided))
    }

    fn resolve_encoding(
        &self,
        choice: EncodingChoice,
        data_len: usize,
        old_style_api: bool,
    ) -> Result<EncodingScheme, TransactionError> {
        match choice {
            EncodingChoice::Auto if data_len + self.prefix().len() <= self.protocol.op_return_max_size => {
                Ok(EncodingScheme::OpReturn)
            }
            EncodingChoice::Auto if !old_style_api && self.flags.enabled_now(ProtocolFlag::P2shEncoding) => {
                Ok(EncodingScheme::P2sh)
            }
            EncodingChoice::Auto => Ok(EncodingScheme::Multisig),
            EncodingChoice::Explicit(EncodingScheme::P2sh)
                if !self.flags.enabled_now(ProtocolFlag::P2shEncoding) =>
            {
                Err(TransactionError::P2shNotEnabled)
            }
            EncodingChoice::Explicit(EncodingScheme::Legacy) => {
                Err(TransactionError::UnknownEncoding(EncodingScheme::Legacy.to_string()))
            }
            EncodingChoice::Explicit(scheme) => Ok(scheme),
        }
    }

    /// Source's own public key; the first key of a multisig source
    fn source_pubkey(&self, source: &str, provided: &[String]) -> ConstructResult<Vec<u8>> {
        let pubkey = if AddressCodec::is_multisig(source) {
            let (_, pubkeys, _) = AddressCodec::extract_array(&self.expand_multisig(source, provided)?)?;
            pubkeys
                .into_iter()
                .next()
                .ok_or_else(|| TransactionError::InvalidDustReturnPubkey(source.to_string()))?
        } else {
            self.resolve_pubkey(source, provided)?
        };
        Ok(decode_pubkey(&pubkey)?)
    }

    fn dust_return_pubkey(
        &self,
        source: &str,
        scheme: EncodingScheme,
        options: &ConstructOptions,
    ) -> ConstructResult<Option<Vec<u8>>> {
        let source_is_p2sh = self.codec.is_p2sh(source);
        let needs_key = match scheme {
            EncodingScheme::Multisig => true,
            EncodingScheme::P2sh => !source_is_p2sh,
            _ => false,
        };

        match &options.dust_return_pubkey {
            DustReturnPubkey::Explicit(pubkey) => Ok(Some(decode_pubkey(pubkey)?)),
            DustReturnPubkey::NodeDefault if scheme == EncodingScheme::Multisig => {
                match &self.protocol.p2sh_dust_return_pubkey {
                    Some(pubkey) => Ok(Some(decode_pubkey(pubkey)?)),
                    None => Err(TransactionError::MissingDustReturnPubkey.into()),
                }
            }
            _ if scheme == EncodingScheme::Multisig && source_is_p2sh => {
                Err(TransactionError::MissingDustReturnPubkey.into())
            }
            _ if needs_key => self.source_pubkey(source, &options.provided_pubkeys).map(Some),
            _ => Ok(None),
        }
    }

    fn p2sh_owner(
        &self,
        dust_return_pubkey: Option<&[u8]>,
        options: &ConstructOptions,
    ) -> Result<DataOwner, TransactionError> {
        if let Some(pubkeys) = &options.p2sh_source_multisig_pubkeys {
            let required = options
                .p2sh_source_multisig_pubkeys_required
                .ok_or(TransactionError::InvalidMultisigPubkeys)?;
            let pubkeys = pubkeys
                .iter()
                .map(|pubkey| hex::decode(pubkey).map_err(|_| TransactionError::InvalidMultisigPubkeys))
                .collect::<Result<Vec<_>, _>>()?;
            return DataOwner::multisig(required, pubkeys);
        }
        dust_return_pubkey
            .map(|pubkey| DataOwner::Pubkey(pubkey.to_vec()))
            .ok_or(TransactionError::MissingP2shOwner)
    }

    fn plan(&self, request: &TxRequest, options: &ConstructOptions, old_style_api: bool) -> ConstructResult<Plan> {
        let source = request.source.as_str();
        self.codec.validate(source)?;
        let source_address = if AddressCodec::is_multisig(source) {
            self.expand_multisig(source, &options.provided_pubkeys)?
        } else {
            source.to_string()
        };

        let data = request.data.as_deref().filter(|data| !data.is_empty());
        let scheme = data
            .map(|data| self.resolve_encoding(options.encoding, data.len(), old_style_api))
            .transpose()?;
        debug!(
            "Constructing {} transaction from {}",
            scheme.map_or("BTC only", EncodingScheme::name),
            source
        );

        let mut destinations = Vec::with_capacity(request.destinations.len());
        for (address, value) in &request.destinations {
            self.codec.validate(address)?;
            let is_multisig = AddressCodec::is_multisig(address);
            let dust_size = if is_multisig {
                options.multisig_dust_size
            } else {
                options.regular_dust_size
            };
            let value = match value {
                None => dust_size,
                Some(value) if *value < dust_size => return Err(TransactionError::DustDestination.into()),
                Some(value) => *value,
            };
            let address = if is_multisig {
                self.expand_multisig(address, &options.provided_pubkeys)?
            } else {
                address.clone()
            };
            destinations.push((address, value));
        }
        let destination_btc_out: u64 = destinations.iter().map(|(_, value)| value).sum();

        let exact_fee = options.exact_fee();
        let mut plan = Plan {
            source_address,
            scheme,
            destination_btc_out,
            size_for_fee: P2PKH_OUTPUT_SIZE * destinations.len(),
            destinations,
            dust_return_pubkey: None,
            owner: None,
            data_chunks: Vec::new(),
            data_value: 0,
            data_btc_out: 0,
            exact_fee,
        };
        let (Some(data), Some(scheme)) = (data, scheme) else {
            return Ok(plan);
        };

        plan.dust_return_pubkey = self.dust_return_pubkey(source, scheme, options)?;
        let prefix_len = self.prefix().len();
        match scheme {
            EncodingScheme::OpReturn => {
                if data.len() + prefix_len > self.protocol.op_return_max_size {
                    return Err(TransactionError::OpReturnTooLarge.into());
                }
                plan.data_chunks = vec![data.to_vec()];
                plan.data_value = options.op_return_value;
                plan.size_for_fee += prefix_len + 10 + data.len();
            }
            EncodingScheme::Multisig | EncodingScheme::PubKeyHash => {
                let (chunk_size, value, output_size) = if scheme == EncodingScheme::Multisig {
                    (MULTISIG_CHUNK_SIZE, options.multisig_dust_size, MULTISIG_OUTPUT_SIZE)
                } else {
                    (PUBKEYHASH_CHUNK_SIZE, options.regular_dust_size, P2PKH_OUTPUT_SIZE)
                };
                plan.data_chunks = chunks(data, chunk_size);
                plan.data_value = value;
                plan.size_for_fee += plan.data_chunks.len() * output_size;
            }
            EncodingScheme::P2sh => {
                let owner = self.p2sh_owner(plan.dust_return_pubkey.as_deref(), options)?;
                plan.data_chunks = chunks(data, maximum_data_chunk_size(prefix_len, Some(&owner)));
                let outputs = calculate_outputs(
                    prefix_len,
                    &plan.data_chunks,
                    plan.destinations.len(),
                    plan.destination_btc_out > 0,
                    options.fee_per_kb,
                    exact_fee,
                    options.regular_dust_size,
                )?;
                plan.owner = Some(owner);
                plan.data_value = outputs.data_value;
                plan.size_for_fee = outputs.size_for_fee;
                plan.exact_fee = outputs.pretx_exact_fee;
                debug!("P2SH datatx fee {} sat", outputs.datatx_fee);
            }
            EncodingScheme::Legacy => {
                return Err(TransactionError::UnknownEncoding(scheme.to_string()).into());
            }
        }
        plan.data_btc_out = plan.data_value * plan.data_chunks.len() as u64;
        debug!(
            "data_btc_out={} (data_value={} chunks={})",
            plan.data_btc_out,
            plan.data_value,
            plan.data_chunks.len()
        );
        Ok(plan)
    }

    fn select(&self, request: &TxRequest, options: &ConstructOptions, plan: &Plan) -> ConstructResult<Selection> {
        self.selector().select(&SelectionRequest {
            source: &request.source,
            scheme: plan.scheme.unwrap_or(EncodingScheme::OpReturn),
            chunk_count: plan.data_chunks.len(),
            allow_unconfirmed_inputs: options.allow_unconfirmed_inputs,
            unspent_tx_hash: options.unspent_tx_hash,
            custom_inputs: options.custom_inputs.as_deref(),
            fee_per_kb: options.fee_per_kb,
            estimate_fee_per_kb: options.estimate_fee_per_kb,
            estimate_fee_conf_target: options.estimate_fee_conf_target,
            exact_fee: plan.exact_fee,
            fee_provided: options.fee_provided,
            size_for_fee: plan.size_for_fee,
            destination_btc_out: plan.destination_btc_out,
            data_btc_out: plan.data_btc_out,
            regular_dust_size: options.regular_dust_size,
            multisig_dust_size: options.multisig_dust_size,
            disable_utxo_locks: options.disable_utxo_locks,
        })
    }

    fn change_output<'p>(plan: &'p Plan, selection: &Selection) -> Option<(&'p str, u64)> {
        (selection.change > 0).then_some((plan.source_address.as_str(), selection.change))
    }

    fn build_single(&self, request: &TxRequest, options: &ConstructOptions, plan: &Plan) -> ConstructResult<Built> {
        let selection = self.select(request, options, plan)?;
        let data = plan.scheme.filter(|_| !plan.data_chunks.is_empty()).map(|scheme| DataOutput {
            scheme,
            chunks: plan.data_chunks.clone(),
            value: plan.data_value,
        });
        let tx = Serializer::new(&self.codec, self.prefix()).serialise(
            &selection.inputs,
            &plan.destinations,
            data.as_ref(),
            Self::change_output(plan, &selection),
            plan.dust_return_pubkey.as_deref(),
        );
        match tx {
            Ok(tx) => Ok(Built {
                tx,
                pretx: None,
                pretx_txid: None,
                selection: Some(selection),
                source_input: None,
            }),
            Err(e) => {
                self.release(request, options, Some(&selection), None);
                Err(e)
            }
        }
    }

    /// Pretx (unless its txid is given) and, when its txid is known, the datatx
    ///
    /// `Ok(Err(pretx))` when only the pretx can be built yet.
    fn build_p2sh(
        &self,
        request: &TxRequest,
        options: &ConstructOptions,
        plan: &Plan,
    ) -> ConstructResult<Result<Built, Transaction>> {
        if options.segwit && options.p2sh_pretx_txid.is_some() {
            return Err(TransactionError::SegwitWithPretx.into());
        }
        let owner = plan.owner.as_ref().ok_or(TransactionError::MissingP2shOwner)?;
        let serializer = Serializer::new(&self.codec, self.prefix());
        let source_value_script = if plan.destination_btc_out > 0 {
            Some(self.codec.address_to_script(&plan.source_address)?)
        } else {
            None
        };

        let (pretx, pretx_txid, selection) = match options.p2sh_pretx_txid {
            Some(txid) => (None, txid, None),
            None => {
                let selection = self.select(request, options, plan)?;
                let source_value =
                    (plan.destination_btc_out > 0).then_some((plan.source_address.as_str(), plan.destination_btc_out));
                let pretx = serializer.serialise_p2sh_pretx(
                    &selection.inputs,
                    &plan.data_chunks,
                    owner,
                    plan.data_value,
                    source_value,
                    Self::change_output(plan, &selection),
                );
                let pretx = match pretx {
                    Ok(pretx) => pretx,
                    Err(e) => {
                        self.release(request, options, Some(&selection), None);
                        return Err(e);
                    }
                };
                let datatx_inputs = plan.data_chunks.len() + usize::from(plan.destination_btc_out > 0);
                self.locks.lock_pretx(&pretx, datatx_inputs);
                if !options.segwit {
                    warn!("Returning the P2SH pretx only; build the datatx once it is broadcast");
                    return Ok(Err(pretx));
                }
                let txid = pretx.compute_txid();
                debug!("Segwit pretx txid {}", txid);
                (Some(pretx), txid, Some(selection))
            }
        };

        let source_input = if self.codec.is_p2sh(&request.source) {
            let coin = self.selector().select_any_coin_from_source(
                &request.source,
                true,
                options.regular_dust_size,
                options.disable_utxo_locks,
            )?;
            match coin {
                Some(coin) => Some(coin),
                None => {
                    self.release(request, options, selection.as_ref(), None);
                    return Err(TransactionError::NoP2shSourceInput.into());
                }
            }
        } else {
            None
        };

        let datatx = serializer.serialise_p2sh_datatx(
            &pretx_txid,
            &plan.data_chunks,
            owner,
            source_value_script,
            source_input.as_ref(),
            &plan.destinations,
        );
        match datatx {
            Ok(tx) => Ok(Ok(Built {
                tx,
                pretx,
                pretx_txid: Some(pretx_txid),
                selection,
                source_input,
            })),
            Err(e) => {
                self.release(request, options, selection.as_ref(), source_input.as_ref());
                Err(e)
            }
        }
    }

    /// Give back reserved inputs of a transaction that will not be returned
    fn release(
        &self,
        request: &TxRequest,
        options: &ConstructOptions,
        selection: Option<&Selection>,
        source_input: Option<&Utxo>,
    ) {
        if options.disable_utxo_locks {
            return;
        }
        let mut inputs: Vec<Utxo> = selection.map(|s| s.inputs.clone()).unwrap_or_default();
        inputs.extend(source_input.cloned());
        if !inputs.is_empty() {
            warn!("Releasing {} inputs of {}", inputs.len(), request.source);
            self.locks.unlock(&request.source, &inputs);
        }
    }

    /// Decode `built` and compare it with the request
    fn self_check(&self, request: &TxRequest, plan: &Plan, built: &Built) -> ConstructResult<()> {
        let mut desired_source = self.codec.make_canonical(&request.source)?;
        let desired_destination = request
            .destinations
            .iter()
            .map(|(address, _)| self.codec.make_canonical(address))
            .collect::<Result<Vec<_>, _>>()?
            .join("-");
        let desired_data = request.data.clone().unwrap_or_default();

        if let (Some(txid), Some(pretx)) = (built.pretx_txid, &built.pretx) {
            self.backend.cache_pretx(txid, pretx.clone());
        }
        let decoded = self.extractor.extract_new(
            &built.tx,
            self.flags.current_block_index(),
            self.flags.enabled_now(ProtocolFlag::P2shAddresses),
            self.codec.is_bech32(&desired_source),
        );
        if let (Some(txid), Some(_)) = (built.pretx_txid, &built.pretx) {
            self.backend.clear_pretx(&txid);
        }

        let describe = |source: &str, destination: &str, data: &[u8]| {
            format!("({}, {}, {})", source, destination, hex::encode(data))
        };
        let parsed = match decoded {
            Ok(TxInfo::NotAProtocolTx) | Ok(TxInfo::DispenserTrigger(_)) if desired_data.is_empty() => {
                debug!("BTC only transaction");
                return Ok(());
            }
            Ok(TxInfo::Payload(message)) => {
                if plan.scheme == Some(EncodingScheme::P2sh) {
                    desired_source = message.source.clone();
                }
                if (&message.source, &message.destination, &message.data)
                    == (&desired_source, &desired_destination, &desired_data)
                {
                    return Ok(());
                }
                describe(&message.source, &message.destination, &message.data)
            }
            Ok(TxInfo::NotAProtocolTx) => "not a protocol transaction".to_string(),
            Ok(TxInfo::DispenserTrigger(trigger)) => describe(&trigger.source, &trigger.destination, &trigger.data),
            Err(e) => e.to_string(),
        };

        Err(TransactionError::SelfCheckMismatch {
            desired: describe(&desired_source, &desired_destination, &desired_data),
            parsed,
        }
        .into())
    }

    /// Build the unsigned transaction(s) for `request`
    pub fn construct(&self, request: &TxRequest, options: &ConstructOptions) -> ConstructResult<ConstructOutput> {
        let old_style_api = options.old_style_api.unwrap_or(self.protocol.old_style_api);
        let plan = self.plan(request, options, old_style_api)?;

        let built = if plan.scheme == Some(EncodingScheme::P2sh) {
            match self.build_p2sh(request, options, &plan)? {
                Ok(built) => built,
                Err(pretx) => return Ok(return_result(vec![Some(serialize_hex(&pretx))], old_style_api)?),
            }
        } else {
            self.build_single(request, options, &plan)?
        };

        if let Err(e) = self.self_check(request, &plan, &built) {
            warn!("Constructed transaction failed its self-check: {}", e);
            self.release(request, options, built.selection.as_ref(), built.source_input.as_ref());
            return Err(e);
        }

        let tx_hex = serialize_hex(&built.tx);
        info!(
            "Constructed {} transaction {} from {}",
            plan.scheme.map_or("BTC only", EncodingScheme::name),
            built.tx.compute_txid(),
            request.source
        );

        if options.extended_tx_info {
            let (btc_in, btc_change, btc_fee) = built
                .selection
                .as_ref()
                .map_or((0, 0, 0), |selection| (selection.btc_in, selection.change, selection.fee));
            return Ok(ConstructOutput::Extended(ExtendedTxInfo {
                btc_in,
                btc_out: plan.destination_btc_out + plan.data_btc_out,
                btc_change,
                btc_fee,
                tx_hex,
            }));
        }

        let pretx_hex = built.pretx.as_ref().map(serialize_hex);
        Ok(return_result(vec![pretx_hex, Some(tx_hex)], old_style_api)?)
    }
}

fn decode_pubkey(pubkey: &str) -> Result<Vec<u8>, TransactionError> {
    if !is_pubkey_hex(pubkey) {
        return Err(TransactionError::InvalidDustReturnPubkey(pubkey.to_string()));
    }
    hex::decode(pubkey).map_err(|_| TransactionError::InvalidDustReturnPubkey(pubkey.to_string()))
}
