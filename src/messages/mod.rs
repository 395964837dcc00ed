//! Message payloads built on top of the transaction codec
//!
//! Each module packs a message body behind its type id and hands a
//! [`TxRequest`](crate::transaction::TxRequest) to `construct`.

pub mod rpsresolve;

pub use rpsresolve::{resolve_game, Player, ResolvedMove, RpsMatch, RpsResolve};
