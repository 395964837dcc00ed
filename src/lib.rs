//! Counterparty transaction codec
//!
//! Decodes protocol messages embedded in Bitcoin transactions and builds
//! unsigned transactions that carry them.

pub mod backend;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod decoder;
pub mod encoding;
pub mod errors;
pub mod ledger;
pub mod messages;
pub mod script;
pub mod transaction;
pub mod types;
