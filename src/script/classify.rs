//! Output script shape recognition
//!
//! Which shapes count as an address depends on protocol changes active at
//! the height of the transaction being interpreted, so every gated helper
//! takes the block index explicitly.

use super::address::AddressCodec;
use super::asm::{script_to_asm, Token};
use crate::config::Network;
use crate::errors::DecodeError;
use crate::ledger::{ProtocolFlag, ProtocolFlags};
use bitcoin::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_RETURN,
};
use bitcoin::Script;

/// Address kind carried by a hash extracted from a script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    PubKeyHash,
    ScriptHash,
}

impl HashKind {
    pub fn version(self, network: Network) -> u8 {
        match self {
            HashKind::PubKeyHash => network.address_version(),
            HashKind::ScriptHash => network.p2sh_address_version(),
        }
    }
}

/// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
pub fn get_checksig(asm: &[Token]) -> Result<&[u8], DecodeError> {
    if let [dup, hash160, Token::Data(hash), equalverify, checksig] = asm {
        if dup.is_op(OP_DUP)
            && hash160.is_op(OP_HASH160)
            && equalverify.is_op(OP_EQUALVERIFY)
            && checksig.is_op(OP_CHECKSIG)
        {
            return Ok(hash.as_slice());
        }
    }
    Err(DecodeError::new("invalid OP_CHECKSIG"))
}

/// N-of-2 or N-of-3 bare multisig; returns `(pubkeys, signatures required)`
pub fn get_checkmultisig(asm: &[Token]) -> Result<(Vec<&[u8]>, u8), DecodeError> {
    let invalid = || DecodeError::new("invalid OP_CHECKMULTISIG");
    let (total, rest) = match asm.len() {
        5 => (2u8, &asm[1..3]),
        6 => (3u8, &asm[1..4]),
        _ => return Err(invalid()),
    };
    if !asm[asm.len() - 2].is_num(total) || !asm[asm.len() - 1].is_op(OP_CHECKMULTISIG) {
        return Err(invalid());
    }
    // a required count of 0 arrives as an empty push
    let required = match &asm[0] {
        Token::Num(n) => *n,
        Token::Data(bytes) if bytes.is_empty() => 0,
        _ => return Err(invalid()),
    };
    let pubkeys = rest
        .iter()
        .map(|token| token.as_data().ok_or_else(invalid))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((pubkeys, required))
}

/// `OP_RETURN <data>`
pub fn get_opreturn(asm: &[Token]) -> Result<&[u8], DecodeError> {
    if let [op_return, Token::Data(data)] = asm {
        if op_return.is_op(OP_RETURN) {
            return Ok(data.as_slice());
        }
    }
    Err(DecodeError::new("invalid OP_RETURN"))
}

/// `OP_HASH160 <hash> OP_EQUAL`
pub fn get_scripthash(asm: &[Token]) -> Option<&[u8]> {
    match asm {
        [hash160, Token::Data(hash), equal] if hash160.is_op(OP_HASH160) && equal.is_op(OP_EQUAL) => {
            Some(hash.as_slice())
        }
        _ => None,
    }
}

/// Segwit outputs start with the empty push (`OP_0`)
pub fn is_segwit_output(asm: &[Token]) -> bool {
    matches!(asm.first(), Some(Token::Data(bytes)) if bytes.is_empty())
}

pub fn is_witness_v0_keyhash(script: &Script) -> bool {
    let bytes = script.as_bytes();
    bytes.len() == 22 && bytes[0] == 0x00 && bytes[1] == 0x14
}

/// Hash and address kind of a singlesig output, gated by protocol height
///
/// Before `multisig_addresses` only the strict P2PKH pattern is accepted.
/// After it, a script starting with `OP_HASH160` is read as P2SH once
/// `p2sh_dispensers_support` is active as well.
pub fn get_pubkeyhash(
    script: &Script,
    block_index: u32,
    flags: &dyn ProtocolFlags,
) -> Option<(Vec<u8>, HashKind)> {
    let asm = script_to_asm(script).ok()?;

    if !flags.enabled(ProtocolFlag::MultisigAddresses, block_index) {
        return get_checksig(&asm)
            .ok()
            .map(|hash| (hash.to_vec(), HashKind::PubKeyHash));
    }

    match asm.first() {
        Some(first) if first.is_op(OP_DUP) => get_checksig(&asm)
            .ok()
            .map(|hash| (hash.to_vec(), HashKind::PubKeyHash)),
        Some(first)
            if first.is_op(OP_HASH160)
                && flags.enabled(ProtocolFlag::P2shDispensersSupport, block_index) =>
        {
            get_scripthash(&asm).map(|hash| (hash.to_vec(), HashKind::ScriptHash))
        }
        _ => None,
    }
}

/// Address paid by a singlesig output, or `None` for anything else
pub fn get_address(
    script: &Script,
    block_index: u32,
    flags: &dyn ProtocolFlags,
    codec: &AddressCodec,
) -> Option<String> {
    if flags.enabled(ProtocolFlag::CorrectSegwitTxids, block_index) && is_witness_v0_keyhash(script) {
        return codec.script_to_address(script).ok();
    }

    let (hash, kind) = get_pubkeyhash(script, block_index, flags)?;
    if hash.is_empty() {
        return None;
    }
    let version = kind.version(codec.network());
    let address = codec.base58_check_encode(&hash, version);

    // the burn address is not a real hash160 image
    if address != codec.network().unspendable()
        && codec.base58_check_decode(&address, version).ok()? != hash
    {
        return None;
    }
    Some(address)
}
