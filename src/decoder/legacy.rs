//! Singlesig-era extraction
//!
//! Before multisig addresses the layout was fixed: at most one destination,
//! then data (plaintext OP_RETURN, plaintext 1-of-2 multisig or obfuscated
//! pubkeyhash chunks), then change. Every input must come from the same
//! plain address.

use super::DecodeContext;
use crate::config::Network;
use crate::encoding::legacy::{LegacyPiece, LegacyPubkeyhashReader, PUBKEYHASH_ENCODING_HEIGHT};
use crate::errors::DecodeError;
use crate::script::{get_address, get_pubkeyhash, script_to_asm, Token};
use crate::types::ProtocolMessage;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_RETURN};
use tracing::trace;

/// What a legacy data output contributed
enum LegacyOutput {
    /// Not readable; the output is skipped entirely
    Skip,
    Data(Vec<u8>),
    /// Last pubkeyhash chunk; stop reading outputs
    End(Vec<u8>),
    Other,
}

fn read_legacy_output(
    ctx: &DecodeContext<'_>,
    asm: &[Token],
    output_index: usize,
    reader: &mut LegacyPubkeyhashReader,
) -> Result<LegacyOutput, DecodeError> {
    match asm {
        [op_return, data] if op_return.is_op(OP_RETURN) => Ok(match data.as_data() {
            Some(chunk) => LegacyOutput::Data(chunk.to_vec()),
            None => LegacyOutput::Skip,
        }),
        [one, _, data_pubkey, two, checkmultisig]
            if one.is_num(1) && two.is_num(2) && checkmultisig.is_op(OP_CHECKMULTISIG) =>
        {
            Ok(match data_pubkey.as_data() {
                Some(pubkey) => match pubkey.split_first() {
                    Some((&len, rest)) => LegacyOutput::Data(rest[..usize::from(len).min(rest.len())].to_vec()),
                    None => LegacyOutput::Data(Vec::new()),
                },
                None => LegacyOutput::Skip,
            })
        }
        [_, _, _, _, _]
            if ctx.block_index >= PUBKEYHASH_ENCODING_HEIGHT || ctx.codec.network() != Network::Mainnet =>
        {
            let script = &ctx.tx.output[output_index].script_pubkey;
            let Some((pubkeyhash, _)) = get_pubkeyhash(script, ctx.block_index, ctx.flags) else {
                return Ok(LegacyOutput::Skip);
            };
            if ctx.tx.is_coinbase() {
                return Err(DecodeError::new("coinbase transaction"));
            }
            let plain = ctx.obfuscator.decrypt(&pubkeyhash);
            Ok(match reader.read(ctx.prefix, &plain) {
                LegacyPiece::NotData => LegacyOutput::Other,
                LegacyPiece::Data(chunk) => LegacyOutput::Data(chunk),
                LegacyPiece::Terminal(chunk) => LegacyOutput::End(chunk),
            })
        }
        _ => Ok(LegacyOutput::Other),
    }
}

pub(crate) fn extract_legacy(ctx: &DecodeContext<'_>) -> Result<ProtocolMessage, DecodeError> {
    let unspendable = ctx.codec.network().unspendable();
    let mut fee: i64 = 0;
    let mut destination: Option<String> = None;
    let mut btc_amount: u64 = 0;
    let mut data: Vec<u8> = Vec::new();
    let mut reader = LegacyPubkeyhashReader::new();

    for (index, output) in ctx.tx.output.iter().enumerate() {
        let value = output.value.to_sat();
        fee -= value as i64;

        let asm = script_to_asm(&output.script_pubkey)?;
        match read_legacy_output(ctx, &asm, index, &mut reader)? {
            LegacyOutput::Skip => continue,
            LegacyOutput::Data(chunk) => data.extend_from_slice(&chunk),
            LegacyOutput::End(chunk) => {
                data.extend_from_slice(&chunk);
                break;
            }
            LegacyOutput::Other => {}
        }

        // the destination is the first address output before any data
        if destination.is_none() && btc_amount == 0 && data.is_empty() {
            if let Some(address) = get_address(&output.script_pubkey, ctx.block_index, ctx.flags, ctx.codec) {
                destination = Some(address);
                btc_amount = value;
            }
        }
    }

    let is_burn = destination.as_deref() == Some(unspendable);
    if !is_burn {
        data = match data.strip_prefix(ctx.prefix) {
            Some(rest) => rest.to_vec(),
            None => return Err(DecodeError::new("no prefix")),
        };
    }
    if data.is_empty() && !is_burn {
        return Err(DecodeError::new("no data and not unspendable"));
    }

    let mut sources: Vec<String> = Vec::with_capacity(ctx.tx.input.len());
    for input in &ctx.tx.input {
        let prevout = ctx.prevout(&input.previous_output)?;
        fee += prevout.value as i64;
        match get_address(&prevout.script_pubkey, ctx.block_index, ctx.flags, ctx.codec) {
            Some(address) => sources.push(address),
            None => return Err(DecodeError::new("invalid scriptpubkey")),
        }
    }

    let source = match sources.split_first() {
        Some((first, rest)) if rest.iter().all(|other| other == first) => first.clone(),
        _ => {
            trace!("Legacy inputs disagree on the source: {:?}", sources);
            return Err(DecodeError::new("inconsistent sources"));
        }
    };

    Ok(ProtocolMessage {
        source,
        destination: destination.unwrap_or_default(),
        btc_amount,
        fee,
        data,
    })
}
