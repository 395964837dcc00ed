//! Output walk for the multisig and P2SH extractors
//!
//! Destinations come first, then data chunks. A destination-looking output
//! once data has started is change and ends the walk.

use super::DecodeContext;
use crate::encoding::chunk::{decode_length_prefixed, decode_opreturn, multisig_data_bytes};
use crate::errors::DecodeError;
use crate::ledger::ProtocolFlag;
use crate::script::classify::{get_checkmultisig, get_checksig, get_opreturn, get_scripthash, is_segwit_output};
use crate::script::{script_to_asm, AddressCodec, HashKind, Token};
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKSIG, OP_HASH160, OP_RETURN};
use bitcoin::Script;

/// What one output turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputReading {
    Destination(String),
    /// Chunk with prefix removed
    Data(Vec<u8>),
}

/// Destinations, data and fee accumulated over the outputs
#[derive(Debug, Default)]
pub struct VoutScan {
    pub destinations: Vec<String>,
    pub btc_amount: u64,
    /// Minus the value of every output visited
    pub fee: i64,
    pub data: Vec<u8>,
    /// One slot per visited output; filled for outputs that may pay a dispenser
    pub potential_dispensers: Vec<Option<(String, u64)>>,
}

pub(crate) fn decode_checksig(ctx: &DecodeContext<'_>, asm: &[Token]) -> Result<OutputReading, DecodeError> {
    let pubkeyhash = get_checksig(asm)?;
    let plain = ctx.obfuscator.decrypt(pubkeyhash);
    if let Some(data) = decode_length_prefixed(ctx.prefix, &plain) {
        return Ok(OutputReading::Data(data));
    }
    let version = HashKind::PubKeyHash.version(ctx.codec.network());
    Ok(OutputReading::Destination(
        ctx.codec.base58_check_encode(pubkeyhash, version),
    ))
}

pub(crate) fn decode_checkmultisig(
    ctx: &DecodeContext<'_>,
    asm: &[Token],
) -> Result<OutputReading, DecodeError> {
    let (pubkeys, required) = get_checkmultisig(asm)?;
    let plain = ctx.obfuscator.decrypt(&multisig_data_bytes(&pubkeys));
    if let Some(data) = decode_length_prefixed(ctx.prefix, &plain) {
        return Ok(OutputReading::Data(data));
    }
    let pubkeyhashes: Vec<String> = pubkeys
        .iter()
        .map(|pubkey| ctx.codec.pubkey_to_pubkeyhash(pubkey))
        .collect();
    Ok(OutputReading::Destination(AddressCodec::construct_array(
        required,
        &pubkeyhashes,
        pubkeyhashes.len(),
    )))
}

pub(crate) fn decode_scripthash(codec: &AddressCodec, hash: &[u8]) -> OutputReading {
    let version = HashKind::ScriptHash.version(codec.network());
    OutputReading::Destination(codec.base58_check_encode(hash, version))
}

pub(crate) fn decode_segwit(codec: &AddressCodec, script: &Script) -> Result<OutputReading, DecodeError> {
    codec
        .script_to_address(script)
        .map(OutputReading::Destination)
        .map_err(|e| DecodeError::new(e.to_string()))
}

/// Read one output; the flag says whether it could pay a dispenser
fn read_output(
    ctx: &DecodeContext<'_>,
    script: &Script,
    p2sh_support: bool,
) -> Result<(OutputReading, bool), DecodeError> {
    let asm = script_to_asm(script)?;
    let unrecognised = || DecodeError::new("unrecognised output type");
    let (first, last) = match (asm.first(), asm.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(unrecognised()),
    };

    if first.is_op(OP_RETURN) {
        let pushed = get_opreturn(&asm)?;
        let data = decode_opreturn(ctx.prefix, pushed, &ctx.obfuscator)?;
        return Ok((OutputReading::Data(data), false));
    }
    if last.is_op(OP_CHECKSIG) {
        return Ok((decode_checksig(ctx, &asm)?, true));
    }
    if last.is_op(OP_CHECKMULTISIG) {
        let reading = decode_checkmultisig(ctx, &asm).map_err(|_| unrecognised())?;
        return Ok((reading, true));
    }
    if p2sh_support && first.is_op(OP_HASH160) {
        if let Some(hash) = get_scripthash(&asm) {
            let dispensable = ctx.enabled(ProtocolFlag::P2shDispensersSupport);
            return Ok((decode_scripthash(ctx.codec, hash), dispensable));
        }
    }
    if ctx.enabled(ProtocolFlag::SegwitSupport) && is_segwit_output(&asm) {
        let dispensable = ctx.enabled(ProtocolFlag::CorrectSegwitTxids);
        return Ok((decode_segwit(ctx.codec, script)?, dispensable));
    }
    Err(unrecognised())
}

/// Walk the outputs in order
pub(crate) fn parse_transaction_vouts(ctx: &DecodeContext<'_>, p2sh_support: bool) -> Result<VoutScan, DecodeError> {
    let unspendable = ctx.codec.network().unspendable();
    let mut scan = VoutScan::default();

    for output in &ctx.tx.output {
        let value = output.value.to_sat();
        scan.potential_dispensers.push(None);
        scan.fee -= value as i64;

        let (reading, dispensable) = read_output(ctx, &output.script_pubkey, p2sh_support)?;
        if dispensable {
            if let (OutputReading::Destination(address), Some(slot)) =
                (&reading, scan.potential_dispensers.last_mut())
            {
                *slot = Some((address.clone(), value));
            }
        }

        let burn_only = scan.destinations.len() == 1 && scan.destinations[0] == unspendable;
        match reading {
            OutputReading::Destination(address) if scan.data.is_empty() && !burn_only => {
                scan.destinations.push(address);
                scan.btc_amount += value;
            }
            OutputReading::Data(chunk) if chunk.is_empty() && scan.data.is_empty() && !burn_only => {
                return Err(DecodeError::new("empty data chunk"));
            }
            // change
            OutputReading::Destination(_) => break,
            OutputReading::Data(chunk) => scan.data.extend_from_slice(&chunk),
        }
    }
    Ok(scan)
}
