//! Transaction info extraction
//!
//! Turns an arbitrary transaction into a [`TxInfo`](crate::types::TxInfo):
//! a protocol payload, a dispenser trigger or "not a protocol transaction".
//!
//! Which rules apply depends on the height of the transaction:
//! - **legacy**: singlesig outputs only, plaintext multisig and OP_RETURN data
//! - **multisig**: obfuscated multisig/pubkeyhash/OP_RETURN chunks, any
//!   number of destinations
//! - **p2sh**: as multisig, plus P2SH destinations and data carried in
//!   P2SH input scripts
//!
//! Previous outputs (for sources and the fee) are read through a shared
//! [`PrevoutCache`](crate::backend::PrevoutCache).

pub mod dispensers;
pub mod extractor;
pub mod legacy;
pub mod outputs;
pub mod sources;

pub use dispensers::{DispenserIndex, NoDispensers, StaticDispensers};
pub use extractor::TxInfoExtractor;

use crate::backend::{Backend, Prevout, PrevoutCache};
use crate::crypto::Obfuscator;
use crate::errors::DecodeError;
use crate::ledger::{ProtocolFlag, ProtocolFlags};
use crate::script::AddressCodec;
use bitcoin::{OutPoint, Transaction};

/// Everything one extraction needs, bound to the transaction being decoded
pub(crate) struct DecodeContext<'a> {
    pub tx: &'a Transaction,
    pub block_index: u32,
    pub flags: &'a dyn ProtocolFlags,
    pub codec: &'a AddressCodec,
    pub prefix: &'a [u8],
    pub obfuscator: Obfuscator,
    pub backend: &'a dyn Backend,
    pub prevouts: &'a PrevoutCache,
}

impl<'a> DecodeContext<'a> {
    pub fn enabled(&self, flag: ProtocolFlag) -> bool {
        self.flags.enabled(flag, self.block_index)
    }

    pub fn prevout(&self, outpoint: &OutPoint) -> Result<Prevout, DecodeError> {
        Ok(self.prevouts.get_or_fetch(self.backend, outpoint)?)
    }
}
