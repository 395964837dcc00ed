//! Script handling
//!
//! - `asm`: script tokenisation
//! - `classify`: output shape recognition, gated by protocol height
//! - `address`: base58/bech32/multisig-array address codec

pub mod address;
pub mod asm;
pub mod classify;

pub use address::AddressCodec;
pub use asm::{script_to_asm, Token};
pub use classify::{get_address, get_pubkeyhash, HashKind};

use bitcoin::script::PushBytesBuf;

/// Wrap bytes for a script push
///
/// Fails only for pushes beyond the 4GB script limit.
pub fn push_bytes(data: &[u8]) -> Result<PushBytesBuf, String> {
    PushBytesBuf::try_from(data.to_vec()).map_err(|e| format!("push of {} bytes: {}", data.len(), e))
}
