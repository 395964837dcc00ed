use super::dispensers::{build_dispenser_trigger, get_dispensers_outputs, DispenserIndex, NoDispensers};
use super::legacy::extract_legacy;
use super::outputs::parse_transaction_vouts;
use super::sources::{get_transaction_source_from_p2sh, get_transaction_sources};
use super::DecodeContext;
use crate::backend::{Backend, PrevoutCache};
use crate::config::Network;
use crate::crypto::Obfuscator;
use crate::errors::DecodeError;
use crate::ledger::{ProtocolFlag, ProtocolFlags};
use crate::script::AddressCodec;
use crate::types::{ProtocolMessage, TxInfo, P2SH_MARKER};
use bitcoin::Transaction;
use std::sync::Arc;
use tracing::{debug, trace};

/// Decodes transactions into [`TxInfo`]
///
/// Holds no per-transaction state; one extractor can serve many threads.
pub struct TxInfoExtractor {
    codec: AddressCodec,
    prefix: Vec<u8>,
    flags: Arc<dyn ProtocolFlags>,
    backend: Arc<dyn Backend>,
    dispensers: Arc<dyn DispenserIndex>,
    prevouts: PrevoutCache,
}

impl TxInfoExtractor {
    pub fn new(
        network: Network,
        prefix: &[u8],
        flags: Arc<dyn ProtocolFlags>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            codec: AddressCodec::new(network),
            prefix: prefix.to_vec(),
            flags,
            backend,
            dispensers: Arc::new(NoDispensers),
            prevouts: PrevoutCache::new(),
        }
    }

    pub fn with_dispensers(mut self, dispensers: Arc<dyn DispenserIndex>) -> Self {
        self.dispensers = dispensers;
        self
    }

    pub fn codec(&self) -> &AddressCodec {
        &self.codec
    }

    pub fn prevouts(&self) -> &PrevoutCache {
        &self.prevouts
    }

    /// Decode `tx` at `block_index` (chain tip when `None` or 0)
    ///
    /// Any decoding failure is reported as [`TxInfo::NotAProtocolTx`].
    pub fn get_tx_info(&self, tx: &Transaction, block_index: Option<u32>) -> TxInfo {
        self.get_tx_info_with(tx, block_index, false)
    }

    /// As [`get_tx_info`](Self::get_tx_info), telling the P2SH reader whether
    /// spent outputs came from segwit transactions (only consulted before
    /// `prevout_segwit_fix`)
    pub fn get_tx_info_with(&self, tx: &Transaction, block_index: Option<u32>, p2sh_is_segwit: bool) -> TxInfo {
        match self.extract(tx, block_index, p2sh_is_segwit) {
            Ok(info) => info,
            Err(e) => {
                debug!("Transaction {} is not a protocol transaction: {}", tx.compute_txid(), e);
                TxInfo::NotAProtocolTx
            }
        }
    }

    /// Pick the extraction rules active at the height of `tx` and apply them
    pub fn extract(
        &self,
        tx: &Transaction,
        block_index: Option<u32>,
        p2sh_is_segwit: bool,
    ) -> Result<TxInfo, DecodeError> {
        let block_index = block_index
            .filter(|height| *height > 0)
            .unwrap_or_else(|| self.flags.current_block_index());

        if self.flags.enabled(ProtocolFlag::P2shAddresses, block_index) {
            self.extract_new(tx, block_index, true, p2sh_is_segwit)
        } else if self.flags.enabled(ProtocolFlag::MultisigAddresses, block_index) {
            self.extract_new(tx, block_index, false, p2sh_is_segwit)
        } else {
            self.extract_legacy(tx, block_index)
        }
    }

    fn context<'a>(&'a self, tx: &'a Transaction, block_index: u32) -> Result<DecodeContext<'a>, DecodeError> {
        if tx.is_coinbase() {
            return Err(DecodeError::new("coinbase transaction"));
        }
        let obfuscator =
            Obfuscator::for_transaction(tx).ok_or_else(|| DecodeError::new("transaction has no inputs"))?;
        Ok(DecodeContext {
            tx,
            block_index,
            flags: self.flags.as_ref(),
            codec: &self.codec,
            prefix: &self.prefix,
            obfuscator,
            backend: self.backend.as_ref(),
            prevouts: &self.prevouts,
        })
    }

    /// Multisig-era rules: any number of destinations, obfuscated chunks,
    /// optionally P2SH destinations and P2SH-carried data
    pub fn extract_new(
        &self,
        tx: &Transaction,
        block_index: u32,
        p2sh_support: bool,
        p2sh_is_segwit: bool,
    ) -> Result<TxInfo, DecodeError> {
        let ctx = self.context(tx, block_index)?;
        let mut scan = parse_transaction_vouts(&ctx, p2sh_support)?;

        let mut p2sh_source = None;
        let mut fee_added = false;
        if ctx.enabled(ProtocolFlag::P2shEncoding) && scan.data == P2SH_MARKER {
            let found = get_transaction_source_from_p2sh(&ctx, p2sh_is_segwit)?;
            scan.fee += found.inputs_value as i64;
            fee_added = true;
            p2sh_source = found.source;
            scan.data = found.data;
        }

        let unspendable = self.codec.network().unspendable();
        let pure_value = scan.data.is_empty() && scan.destinations != [unspendable];
        let mut dispensers_outputs = Vec::new();
        if pure_value {
            if !ctx.enabled(ProtocolFlag::Dispensers) {
                trace!("No data and not unspendable");
                return Ok(TxInfo::NotAProtocolTx);
            }
            dispensers_outputs = get_dispensers_outputs(self.dispensers.as_ref(), &scan.potential_dispensers);
            if dispensers_outputs.is_empty() {
                trace!("No data, not unspendable and no dispenser paid");
                return Ok(TxInfo::NotAProtocolTx);
            }
        }

        let sources = match p2sh_source {
            Some(source) => source,
            None => {
                let (sources, inputs_value) = get_transaction_sources(&ctx)?;
                if !fee_added {
                    scan.fee += inputs_value as i64;
                }
                sources
            }
        };

        if pure_value {
            let multiple = ctx.enabled(ProtocolFlag::MultipleDispenses);
            return Ok(build_dispenser_trigger(&sources, &dispensers_outputs, multiple)
                .map_or(TxInfo::NotAProtocolTx, TxInfo::DispenserTrigger));
        }

        Ok(TxInfo::Payload(ProtocolMessage {
            source: sources,
            destination: scan.destinations.join("-"),
            btc_amount: scan.btc_amount,
            fee: scan.fee,
            data: scan.data,
        }))
    }

    /// Singlesig-era rules
    pub fn extract_legacy(&self, tx: &Transaction, block_index: u32) -> Result<TxInfo, DecodeError> {
        let ctx = self.context(tx, block_index)?;
        extract_legacy(&ctx).map(TxInfo::Payload)
    }
}
