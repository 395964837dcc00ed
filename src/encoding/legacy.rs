//! Legacy singlesig layout
//!
//! Before multisig addresses, data travelled as plaintext OP_RETURN pushes,
//! plaintext 1-of-2 multisig keys or, from block 293000, obfuscated fake
//! pubkeyhashes. The whole `PREFIX || data` stream is cut into pieces; only
//! the first piece starts with the prefix and the terminal piece is marked by
//! a trailing prefix.
//!
//! Construction never produces this layout any more. The encoders here build
//! fixtures for the legacy extractor.

use super::PUBKEYHASH_CHUNK_SIZE;
use crate::crypto::Obfuscator;
use crate::errors::TransactionError;
use crate::script::push_bytes;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_RETURN};
use bitcoin::script::Builder;
use bitcoin::ScriptBuf;

/// Height at which obfuscated pubkeyhash data became valid on mainnet
pub const PUBKEYHASH_ENCODING_HEIGHT: u32 = 293_000;

/// One deobfuscated pubkeyhash as seen by the legacy reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyPiece {
    /// Not part of the data stream (a destination or change output)
    NotData,
    Data(Vec<u8>),
    /// Last piece, trailing prefix removed
    Terminal(Vec<u8>),
}

/// Tracks whether the pubkeyhash data stream has started
#[derive(Debug, Default)]
pub struct LegacyPubkeyhashReader {
    started: bool,
}

impl LegacyPubkeyhashReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, prefix: &[u8], plain: &[u8]) -> LegacyPiece {
        let Some((&len, rest)) = plain.split_first() else {
            return LegacyPiece::NotData;
        };
        if !(self.started || rest.starts_with(prefix)) {
            return LegacyPiece::NotData;
        }
        self.started = true;

        let piece = &rest[..usize::from(len).min(rest.len())];
        match piece.strip_suffix(prefix) {
            Some(body) => LegacyPiece::Terminal(body.to_vec()),
            None => LegacyPiece::Data(piece.to_vec()),
        }
    }
}

/// Obfuscated fake pubkeyhashes carrying `PREFIX || data`
pub fn encode_pubkeyhash_stream(prefix: &[u8], data: &[u8], obfuscator: &Obfuscator) -> Vec<[u8; 20]> {
    let mut stream = prefix.to_vec();
    stream.extend_from_slice(data);

    let pieces: Vec<&[u8]> = stream.chunks(PUBKEYHASH_CHUNK_SIZE).collect();
    let last = pieces.len().saturating_sub(1);

    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            let mut body = piece.to_vec();
            if i == last {
                body.extend_from_slice(prefix);
            }
            let mut plain = [0u8; 20];
            plain[0] = body.len() as u8;
            plain[1..=body.len()].copy_from_slice(&body);

            let mut hash = [0u8; 20];
            hash.copy_from_slice(&obfuscator.encrypt(&plain));
            hash
        })
        .collect()
}

/// Plaintext `OP_RETURN <chunk>`
pub fn opreturn_script(chunk: &[u8]) -> Result<ScriptBuf, TransactionError> {
    let push = push_bytes(chunk).map_err(TransactionError::Serialisation)?;
    Ok(Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(push)
        .into_script())
}

/// Plaintext `1 <owner> <[len] || piece> 2 OP_CHECKMULTISIG`
pub fn multisig_script(owner_pubkey: &[u8], piece: &[u8]) -> Result<ScriptBuf, TransactionError> {
    if piece.len() > 32 {
        return Err(TransactionError::Serialisation(format!(
            "legacy multisig piece of {} bytes",
            piece.len()
        )));
    }
    let mut data_key = [0u8; 33];
    data_key[0] = piece.len() as u8;
    data_key[1..=piece.len()].copy_from_slice(piece);

    let owner = push_bytes(owner_pubkey).map_err(TransactionError::Serialisation)?;
    let data_key = push_bytes(&data_key).map_err(TransactionError::Serialisation)?;
    Ok(Builder::new()
        .push_int(1)
        .push_slice(owner)
        .push_slice(data_key)
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}
