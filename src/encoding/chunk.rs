//! Per-output chunk codecs
//!
//! Every data chunk is prefixed with the protocol prefix before it is
//! obfuscated. Pubkeyhash and multisig chunks additionally carry a length
//! byte and are zero padded to the size of the container.
//!
//! Multisig chunks must look like real public keys: the 62-byte obfuscated
//! block is split in two 31-byte halves and each half gets a sign byte and a
//! nonce byte chosen so that the result is a point on secp256k1.

use crate::crypto::Obfuscator;
use crate::errors::{DecodeError, TransactionError};
use crate::script::address::is_valid_pubkey;
use sha2::{Digest, Sha256};

const PUBKEYHASH_LEN: usize = 20;
const MULTISIG_BLOCK_LEN: usize = 62;
const MULTISIG_HALF_LEN: usize = 31;

/// Obfuscated OP_RETURN push: `arc4(prefix || chunk)`
pub fn encode_opreturn(prefix: &[u8], chunk: &[u8], obfuscator: &Obfuscator) -> Vec<u8> {
    let mut plain = Vec::with_capacity(prefix.len() + chunk.len());
    plain.extend_from_slice(prefix);
    plain.extend_from_slice(chunk);
    obfuscator.encrypt(&plain)
}

/// Inverse of [`encode_opreturn`]
pub fn decode_opreturn(prefix: &[u8], pushed: &[u8], obfuscator: &Obfuscator) -> Result<Vec<u8>, DecodeError> {
    let plain = obfuscator.decrypt(pushed);
    match plain.strip_prefix(prefix) {
        Some(data) => Ok(data.to_vec()),
        None => Err(DecodeError::new("unrecognised OP_RETURN output")),
    }
}

/// `[len] || prefix || chunk`, zero padded to `width`
fn length_prefixed(prefix: &[u8], chunk: &[u8], width: usize) -> Result<Vec<u8>, TransactionError> {
    let body_len = prefix.len() + chunk.len();
    if body_len + 1 > width || body_len > usize::from(u8::MAX) {
        return Err(TransactionError::Serialisation(format!(
            "chunk of {} bytes does not fit a {}-byte container",
            chunk.len(),
            width
        )));
    }
    let mut padded = Vec::with_capacity(width);
    padded.push(body_len as u8);
    padded.extend_from_slice(prefix);
    padded.extend_from_slice(chunk);
    padded.resize(width, 0);
    Ok(padded)
}

/// Read a deobfuscated `[len] || prefix || data || padding` container
///
/// Returns `None` when the prefix is missing. A length byte running past the
/// container is clamped to it.
pub fn decode_length_prefixed(prefix: &[u8], plain: &[u8]) -> Option<Vec<u8>> {
    let (&len, rest) = plain.split_first()?;
    if !rest.starts_with(prefix) {
        return None;
    }
    let end = usize::from(len).min(rest.len());
    rest.get(prefix.len()..end).map(<[u8]>::to_vec).or(Some(Vec::new()))
}

/// Fake pubkeyhash carrying one chunk
pub fn encode_pubkeyhash(
    prefix: &[u8],
    chunk: &[u8],
    obfuscator: &Obfuscator,
) -> Result<[u8; PUBKEYHASH_LEN], TransactionError> {
    let plain = length_prefixed(prefix, chunk, PUBKEYHASH_LEN)?;
    let mut hash = [0u8; PUBKEYHASH_LEN];
    hash.copy_from_slice(&obfuscator.encrypt(&plain));
    Ok(hash)
}

/// Two data public keys carrying one chunk
pub fn encode_multisig(
    prefix: &[u8],
    chunk: &[u8],
    obfuscator: &Obfuscator,
) -> Result<([u8; 33], [u8; 33]), TransactionError> {
    let plain = length_prefixed(prefix, chunk, MULTISIG_BLOCK_LEN)?;
    let obfuscated = obfuscator.encrypt(&plain);
    let (first, second) = obfuscated.split_at(MULTISIG_HALF_LEN);

    let first_key = make_fully_valid(first)?;
    let second_key = make_fully_valid(second)?;
    Ok((first_key, second_key))
}

/// Strip sign and nonce bytes from the data keys of a multisig output
///
/// All keys but the last carry data.
pub fn multisig_data_bytes(pubkeys: &[&[u8]]) -> Vec<u8> {
    let data_keys = pubkeys.len().saturating_sub(1);
    pubkeys[..data_keys]
        .iter()
        .filter(|pubkey| pubkey.len() >= 2)
        .flat_map(|pubkey| pubkey[1..pubkey.len() - 1].iter().copied())
        .collect()
}

/// Turn 31 bytes into a valid compressed public key
///
/// The sign byte and the starting nonce come from `sha256(half)`; the nonce
/// is bumped until the candidate lies on the curve.
pub fn make_fully_valid(half: &[u8]) -> Result<[u8; 33], TransactionError> {
    if half.len() != MULTISIG_HALF_LEN {
        return Err(TransactionError::Serialisation(format!(
            "pubkey body must be {} bytes, got {}",
            MULTISIG_HALF_LEN,
            half.len()
        )));
    }

    let digest = Sha256::digest(half);
    let sign = (digest[0] & 1) + 2;
    let mut nonce = digest[1];

    let mut candidate = [0u8; 33];
    candidate[0] = sign;
    candidate[1..32].copy_from_slice(half);

    for _ in 0..=u8::MAX {
        nonce = nonce.wrapping_add(1);
        candidate[32] = nonce;
        if is_valid_pubkey(&candidate) {
            return Ok(candidate);
        }
    }
    Err(TransactionError::Serialisation(
        "no nonce yields a valid public key".to_string(),
    ))
}
