/// Cryptographic utilities for the Counterparty transaction codec
///
/// ARC4 obfuscation of embedded payload bytes, keyed per transaction.
pub mod arc4;

pub use arc4::Obfuscator;
