//! Payload encodings
//!
//! - **chunk**: per-output codecs for OP_RETURN, 1-of-3 multisig and
//!   pubkeyhash data outputs
//! - **legacy**: the pre-multisig pubkeyhash layout (decode side lives in the
//!   extractor; the encoder exists for fixtures)
//! - **p2sh**: redeem-script data carriers for two-phase construction
//! - **serializer**: unsigned transaction assembly

pub mod chunk;
pub mod legacy;
pub mod p2sh;
pub mod serializer;

pub use serializer::{DataOutput, Serializer};

use crate::errors::TransactionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Usable payload bytes per pubkeyhash output: 20 minus length byte minus prefix
pub const PUBKEYHASH_CHUNK_SIZE: usize = 20 - 1 - 8;

/// Usable payload bytes per multisig output: two 33-byte keys minus length
/// byte, prefix, nonce and sign bytes
pub const MULTISIG_CHUNK_SIZE: usize = (33 * 2) - 1 - 8 - 2 - 2;

/// Where a transaction carries its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingScheme {
    PubKeyHash,
    Multisig,
    OpReturn,
    P2sh,
    Legacy,
}

impl EncodingScheme {
    pub fn name(self) -> &'static str {
        match self {
            EncodingScheme::PubKeyHash => "pubkeyhash",
            EncodingScheme::Multisig => "multisig",
            EncodingScheme::OpReturn => "opreturn",
            EncodingScheme::P2sh => "p2sh",
            EncodingScheme::Legacy => "legacy",
        }
    }

    /// Fixed chunk size, `None` for OP_RETURN (single output) and P2SH
    /// (depends on the data owner)
    pub fn chunk_size(self) -> Option<usize> {
        match self {
            EncodingScheme::PubKeyHash | EncodingScheme::Legacy => Some(PUBKEYHASH_CHUNK_SIZE),
            EncodingScheme::Multisig => Some(MULTISIG_CHUNK_SIZE),
            EncodingScheme::OpReturn | EncodingScheme::P2sh => None,
        }
    }
}

impl fmt::Display for EncodingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncodingScheme {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pubkeyhash" => Ok(EncodingScheme::PubKeyHash),
            "multisig" => Ok(EncodingScheme::Multisig),
            "opreturn" => Ok(EncodingScheme::OpReturn),
            "p2sh" => Ok(EncodingScheme::P2sh),
            "legacy" => Ok(EncodingScheme::Legacy),
            _ => Err(TransactionError::UnknownEncoding(s.to_string())),
        }
    }
}

/// Encoding requested by a caller of `construct`
///
/// Legacy is decode-only and cannot be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EncodingChoice {
    #[default]
    Auto,
    Explicit(EncodingScheme),
}

impl FromStr for EncodingChoice {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(EncodingChoice::Auto);
        }
        match s.parse::<EncodingScheme>()? {
            EncodingScheme::Legacy => Err(TransactionError::UnknownEncoding(s.to_string())),
            scheme => Ok(EncodingChoice::Explicit(scheme)),
        }
    }
}

impl TryFrom<String> for EncodingChoice {
    type Error = TransactionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EncodingChoice> for String {
    fn from(choice: EncodingChoice) -> Self {
        choice.to_string()
    }
}

impl fmt::Display for EncodingChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingChoice::Auto => f.write_str("auto"),
            EncodingChoice::Explicit(scheme) => scheme.fmt(f),
        }
    }
}

/// Fee for `size` bytes at `fee_per_kb`, rounded up to the next satoshi
pub fn fee_for_size(size: usize, fee_per_kb: u64) -> u64 {
    (size as u64 * fee_per_kb).div_ceil(1000)
}

/// Split `data` into `size`-byte chunks; the last one may be shorter
pub fn chunks(data: &[u8], size: usize) -> Vec<Vec<u8>> {
    if size == 0 {
        return vec![data.to_vec()];
    }
    data.chunks(size).map(<[u8]>::to_vec).collect()
}
