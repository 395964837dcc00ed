//! Counterparty transaction codec - type system
//!
//! - `counterparty`: protocol constants and message type ids
//! - `tx_info`: decode results (`TxInfo` and its payload variants)

pub mod counterparty;
pub mod tx_info;

pub use counterparty::{CounterpartyMessageType, COUNTERPARTY_PREFIX, DISPENSE_ID, P2SH_MARKER};
pub use tx_info::{DispenserOutput, DispenserTrigger, ProtocolMessage, TxInfo};
