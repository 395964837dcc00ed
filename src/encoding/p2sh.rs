//! P2SH data carriers
//!
//! Data is stored in the redeem scripts of P2SH outputs created by a funding
//! transaction (the pretx) and revealed when a second transaction (the datatx)
//! spends them. Each redeem script drops its data push, checks the owner's
//! signature, drops a per-output index (so identical chunks still hash to
//! different outputs) and finally requires an empty stack:
//!
//! ```text
//! <PREFIX || chunk> OP_DROP <pubkey> OP_CHECKSIGVERIFY <n> OP_DROP OP_DEPTH 0 OP_EQUAL
//! <PREFIX || chunk> OP_DROP m <pk..> k OP_CHECKMULTISIGVERIFY <n> OP_DROP OP_DEPTH 0 OP_EQUAL
//! ```
//!
//! The datatx signals the layout with an OP_RETURN carrying `PREFIX || "P2SH"`.

use super::fee_for_size;
use crate::errors::{DecodeError, TransactionError};
use crate::script::{push_bytes, script_to_asm, AddressCodec, Token};
use bitcoin::opcodes::all::{
    OP_CHECKMULTISIGVERIFY, OP_CHECKSIGVERIFY, OP_DEPTH, OP_DROP, OP_EQUAL,
};
use bitcoin::script::Builder;
use bitcoin::{Script, ScriptBuf};

pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Output index pushes stay within two bytes
pub const MAX_DATA_CHUNKS: usize = 128;

/// Serialized size of an unsigned data input excluding the data itself
const DATA_INPUT_OVERHEAD: usize = 9 + 181;

/// Who can spend the data outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOwner {
    Pubkey(Vec<u8>),
    Multisig { required: u8, pubkeys: Vec<Vec<u8>> },
}

impl DataOwner {
    pub fn multisig(required: u8, pubkeys: Vec<Vec<u8>>) -> Result<Self, TransactionError> {
        if !(2..=15).contains(&required) || pubkeys.len() < usize::from(required) || pubkeys.len() > 15 {
            return Err(TransactionError::InvalidMultisigPubkeys);
        }
        Ok(DataOwner::Multisig { required, pubkeys })
    }

    fn clause_len(&self) -> usize {
        match self {
            DataOwner::Pubkey(pubkey) => 1 + pubkey.len() + 1,
            DataOwner::Multisig { pubkeys, .. } => 3 + pubkeys.iter().map(|pk| 1 + pk.len()).sum::<usize>(),
        }
    }
}

/// Largest chunk (excluding the prefix) one redeem script can hold
pub fn maximum_data_chunk_size(prefix_len: usize, owner: Option<&DataOwner>) -> usize {
    let budget = match owner {
        Some(DataOwner::Pubkey(pubkey)) => MAX_SCRIPT_ELEMENT_SIZE.saturating_sub(pubkey.len() + 12),
        Some(multisig) => MAX_SCRIPT_ELEMENT_SIZE.saturating_sub(multisig.clause_len() + 10),
        None => MAX_SCRIPT_ELEMENT_SIZE - 44,
    };
    budget.saturating_sub(prefix_len)
}

/// Redeem script for data output `index`
pub fn make_redeem_script(
    prefix: &[u8],
    chunk: &[u8],
    index: usize,
    owner: &DataOwner,
) -> Result<ScriptBuf, TransactionError> {
    if index >= MAX_DATA_CHUNKS {
        return Err(TransactionError::TooManyP2shChunks(index + 1));
    }
    let mut data = Vec::with_capacity(prefix.len() + chunk.len());
    data.extend_from_slice(prefix);
    data.extend_from_slice(chunk);

    let mut builder = Builder::new()
        .push_slice(push_bytes(&data).map_err(TransactionError::Serialisation)?)
        .push_opcode(OP_DROP);

    builder = match owner {
        DataOwner::Pubkey(pubkey) => builder
            .push_slice(push_bytes(pubkey).map_err(TransactionError::Serialisation)?)
            .push_opcode(OP_CHECKSIGVERIFY),
        DataOwner::Multisig { required, pubkeys } => {
            let mut builder = builder.push_int(i64::from(*required));
            for pubkey in pubkeys {
                builder = builder.push_slice(push_bytes(pubkey).map_err(TransactionError::Serialisation)?);
            }
            builder
                .push_int(pubkeys.len() as i64)
                .push_opcode(OP_CHECKMULTISIGVERIFY)
        }
    };

    let script = builder
        .push_int(index as i64)
        .push_opcode(OP_DROP)
        .push_opcode(OP_DEPTH)
        .push_int(0)
        .push_opcode(OP_EQUAL)
        .into_script();

    if script.len() > MAX_SCRIPT_ELEMENT_SIZE {
        return Err(TransactionError::Serialisation(format!(
            "redeem script of {} bytes exceeds {}",
            script.len(),
            MAX_SCRIPT_ELEMENT_SIZE
        )));
    }
    Ok(script)
}

/// Unsigned scriptSig for a data input: `<redeem script> <p2sh scriptPubKey>`
pub fn unsigned_data_script_sig(redeem_script: &Script) -> Result<ScriptBuf, TransactionError> {
    let p2sh = redeem_script.to_p2sh();
    Ok(Builder::new()
        .push_slice(push_bytes(redeem_script.as_bytes()).map_err(TransactionError::Serialisation)?)
        .push_slice(push_bytes(p2sh.as_bytes()).map_err(TransactionError::Serialisation)?)
        .into_script())
}

/// What a data input reveals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2shInput {
    pub source: Option<String>,
    /// Chunk with the prefix removed
    pub data: Vec<u8>,
}

/// Read a data redeem script into `(source, PREFIX || chunk)`
///
/// `None` for anything that is not a data redeem script.
pub fn decode_data_redeem_script(
    redeem_script: &Script,
    prevout_is_segwit: bool,
    codec: &AddressCodec,
) -> Option<(Option<String>, Vec<u8>)> {
    let asm = script_to_asm(redeem_script).ok()?;
    if asm.len() < 9 {
        return None;
    }
    let data = asm[0].as_data()?;
    if !asm[1].is_op(OP_DROP) {
        return None;
    }

    let (owner, tail) = asm[2..].split_at(asm.len() - 7);
    let index_ok = matches!(tail[0], Token::Num(_) | Token::Data(_));
    let tail_ok = tail[1].is_op(OP_DROP)
        && tail[2].is_op(OP_DEPTH)
        && matches!(&tail[3], Token::Data(zero) if zero.is_empty())
        && tail[4].is_op(OP_EQUAL);
    if !(index_ok && tail_ok) {
        return None;
    }

    let source = match owner {
        [Token::Data(pubkey), verify] if verify.is_op(OP_CHECKSIGVERIFY) => {
            if prevout_is_segwit {
                codec.pubkey_to_p2wpkh(pubkey)
            } else {
                Some(codec.pubkey_to_pubkeyhash(pubkey))
            }
        }
        [Token::Num(required), keys @ .., Token::Num(total), verify]
            if verify.is_op(OP_CHECKMULTISIGVERIFY) && usize::from(*total) == keys.len() =>
        {
            let addresses = keys
                .iter()
                .map(|key| key.as_data().map(|pk| codec.pubkey_to_pubkeyhash(pk)))
                .collect::<Option<Vec<_>>>()?;
            Some(AddressCodec::construct_array(*required, &addresses, keys.len()))
        }
        _ => return None,
    };
    Some((source, data.to_vec()))
}

/// Decode one datatx input scriptSig
///
/// Signed inputs end with the redeem script; unsigned ones carry it first,
/// followed by the P2SH scriptPubKey. Inputs without a data redeem script
/// (funding inputs) yield `Ok(None)`.
pub fn decode_p2sh_input(
    asm: &[Token],
    prefix: &[u8],
    prevout_is_segwit: bool,
    codec: &AddressCodec,
) -> Result<Option<P2shInput>, DecodeError> {
    let decode = |token: &Token| {
        token
            .as_data()
            .and_then(|bytes| decode_data_redeem_script(Script::from_bytes(bytes), prevout_is_segwit, codec))
    };

    let found = match asm.last().and_then(decode) {
        Some(found) => Some(found),
        None if asm.len() == 2 => decode(&asm[0]),
        None => None,
    };
    let Some((source, data)) = found else {
        return Ok(None);
    };

    match data.strip_prefix(prefix) {
        Some(chunk) => Ok(Some(P2shInput {
            source,
            data: chunk.to_vec(),
        })),
        None if data.is_empty() => Ok(None),
        None => Err(DecodeError::new("unrecognised P2SH output")),
    }
}

/// Fee and value plan for a two-phase P2SH construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct P2shOutputs {
    /// Pretx bytes attributable to data (and source value) outputs
    pub size_for_fee: usize,
    pub datatx_fee: u64,
    /// Value of each P2SH data output; together they pay the datatx fee
    pub data_value: u64,
    pub data_btc_out: u64,
    /// What remains of a caller's exact fee for the pretx
    pub pretx_exact_fee: Option<u64>,
}

pub fn calculate_outputs(
    prefix_len: usize,
    chunks: &[Vec<u8>],
    destination_count: usize,
    carries_source_value: bool,
    fee_per_kb: u64,
    exact_fee: Option<u64>,
    regular_dust: u64,
) -> Result<P2shOutputs, TransactionError> {
    let n = chunks.len();
    if n == 0 {
        return Err(TransactionError::Serialisation("P2SH encoding without data".to_string()));
    }
    if n > MAX_DATA_CHUNKS {
        return Err(TransactionError::TooManyP2shChunks(n));
    }

    let data_bytes: usize = chunks.iter().map(|chunk| prefix_len + chunk.len()).sum();
    let datatx_size = 10 + 181 + 34 * destination_count + 13 + n * DATA_INPUT_OVERHEAD + data_bytes;
    let datatx_fee = fee_for_size(datatx_size, fee_per_kb);

    let pretx_exact_fee = match exact_fee {
        Some(exact_fee) if exact_fee < datatx_fee => {
            return Err(TransactionError::ExactFeeTooLow {
                exact_fee,
                necessary_fee: datatx_fee,
            })
        }
        Some(exact_fee) => Some(exact_fee - datatx_fee),
        None => None,
    };

    let data_value = regular_dust.max(datatx_fee.div_ceil(n as u64));
    let mut size_for_fee = 10 + 29 * n;
    if carries_source_value {
        size_for_fee += 34;
    }

    Ok(P2shOutputs {
        size_for_fee,
        datatx_fee,
        data_value,
        data_btc_out: data_value * n as u64,
        pretx_exact_fee,
    })
}
