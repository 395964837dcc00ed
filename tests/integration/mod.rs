//! Integration Tests Module
//!
//! End-to-end tests that construct transactions against an in-memory node
//! and decode them back.

pub mod construct_roundtrip;
pub mod p2sh_flow;
pub mod rps_resolve_flow;
pub mod utxo_locks;
pub mod version_gating;
