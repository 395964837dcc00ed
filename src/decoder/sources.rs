//! Source address resolution from spent outputs

use super::outputs::{decode_checkmultisig, decode_checksig, decode_scripthash, decode_segwit, OutputReading};
use super::DecodeContext;
use crate::encoding::p2sh::decode_p2sh_input;
use crate::errors::DecodeError;
use crate::ledger::ProtocolFlag;
use crate::script::classify::{get_scripthash, is_segwit_output};
use crate::script::script_to_asm;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKSIG};
use tracing::trace;

/// Source of a data-carrying P2SH transaction
#[derive(Debug, Default)]
pub struct P2shSource {
    pub source: Option<String>,
    /// Chunks read from the input scripts, concatenated
    pub data: Vec<u8>,
    /// Sum of the spent outputs
    pub inputs_value: u64,
}

fn source_address(reading: OutputReading) -> Result<String, DecodeError> {
    match reading {
        OutputReading::Destination(address) if !address.is_empty() => Ok(address),
        _ => Err(DecodeError::new("data in source")),
    }
}

/// Hyphen-joined source addresses and the total value of the inputs
///
/// Once `first_input_is_source` is active only the first input counts;
/// before that every distinct input address does, in input order.
pub(crate) fn get_transaction_sources(ctx: &DecodeContext<'_>) -> Result<(String, u64), DecodeError> {
    let mut sources: Vec<String> = Vec::new();
    let mut inputs_value = 0u64;

    for input in &ctx.tx.input {
        let prevout = ctx.prevout(&input.previous_output)?;
        inputs_value += prevout.value;

        let asm = script_to_asm(&prevout.script_pubkey)?;
        let (Some(first), Some(last)) = (asm.first(), asm.last()) else {
            return Err(DecodeError::new("unrecognised source type"));
        };

        let source = if last.is_op(OP_CHECKSIG) {
            source_address(decode_checksig(ctx, &asm)?)?
        } else if last.is_op(OP_CHECKMULTISIG) {
            source_address(decode_checkmultisig(ctx, &asm)?)?
        } else if let Some(hash) = get_scripthash(&asm) {
            source_address(decode_scripthash(ctx.codec, hash))?
        } else if ctx.enabled(ProtocolFlag::SegwitSupport) && is_segwit_output(&asm) {
            source_address(decode_segwit(ctx.codec, &prevout.script_pubkey)?)?
        } else {
            trace!("Unrecognised source script {:?} ({:?})", prevout.script_pubkey, first);
            return Err(DecodeError::new("unrecognised source type"));
        };

        if ctx.enabled(ProtocolFlag::FirstInputIsSource) {
            if sources.is_empty() {
                sources.push(source);
            }
        } else if !sources.contains(&source) {
            sources.push(source);
        }
    }

    Ok((sources.join("-"), inputs_value))
}

/// Source and data of a P2SH datatx, read from its input scripts
///
/// Inputs without a data redeem script still count towards the value. Data
/// inputs naming a source must all name the same one; inputs whose owner
/// has no address are skipped in that comparison.
pub(crate) fn get_transaction_source_from_p2sh(
    ctx: &DecodeContext<'_>,
    p2sh_is_segwit: bool,
) -> Result<P2shSource, DecodeError> {
    let mut found = P2shSource::default();

    for input in &ctx.tx.input {
        let prevout = ctx.prevout(&input.previous_output)?;
        found.inputs_value += prevout.value;

        let prevout_is_segwit = if ctx.enabled(ProtocolFlag::PrevoutSegwitFix) {
            prevout.tx_is_segwit
        } else {
            p2sh_is_segwit
        };

        let asm = script_to_asm(&input.script_sig)?;
        let Some(decoded) = decode_p2sh_input(&asm, ctx.prefix, prevout_is_segwit, ctx.codec)? else {
            continue;
        };

        if let Some(source) = decoded.source {
            if found.source.as_ref().is_some_and(|seen| *seen != source) {
                return Err(DecodeError::new("inconsistent p2sh inputs"));
            }
            found.source = Some(source);
        }
        found.data.extend_from_slice(&decoded.data);
    }

    Ok(found)
}
