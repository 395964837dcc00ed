//! Unsigned transaction construction
//!
//! - **options**: the request and per-call knobs
//! - **locks**: advisory reservations of coins and pretx outputs
//! - **coin_selection**: greedy input selection with dust folding
//! - **service**: the `construct` pipeline and its self-check

pub mod coin_selection;
pub mod locks;
pub mod options;
pub mod service;

pub use coin_selection::{pick_inputs, CoinSelector, Selection, SelectionTarget};
pub use locks::{make_outkey_vin, LockRegistry, TtlCache};
pub use options::{ConstructOptions, DustReturnPubkey, TxRequest};
pub use service::{return_result, ConstructOutput, ExtendedTxInfo, TransactionService};
