//! Common Test Utilities
//!
//! A regtest node backed by [`MemoryBackend`], with the service, flags and
//! well-known public keys the suites share.

#![allow(dead_code)]

use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::Transaction;
use counterparty_txcodec::backend::{MemoryBackend, Utxo};
use counterparty_txcodec::config::{AppConfig, Network};
use counterparty_txcodec::ledger::ProtocolChanges;
use counterparty_txcodec::transaction::{ConstructOptions, TransactionService};
use counterparty_txcodec::types::TxInfo;
use std::sync::Arc;

/// Generator point G, 2G and 3G of secp256k1 (compressed)
pub const PUBKEY_G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
pub const PUBKEY_2G: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
pub const PUBKEY_3G: &str = "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

pub const FEE_PER_KB: u64 = 10_000;

pub struct TestNode {
    pub config: AppConfig,
    pub backend: Arc<MemoryBackend>,
    pub flags: Arc<ProtocolChanges>,
    pub service: TransactionService,
}

impl TestNode {
    /// Regtest node with every protocol change active
    pub fn new() -> Self {
        Self::with_flags(ProtocolChanges::new(Network::Regtest))
    }

    pub fn with_flags(flags: ProtocolChanges) -> Self {
        let mut config = AppConfig::default();
        config.network = Network::Regtest;
        Self::with_config(config, flags)
    }

    pub fn with_config(config: AppConfig, flags: ProtocolChanges) -> Self {
        let backend = Arc::new(MemoryBackend::new(config.network));
        let flags = Arc::new(flags);
        let service = TransactionService::new(&config, backend.clone(), flags.clone());
        Self {
            config,
            backend,
            flags,
            service,
        }
    }

    /// Register `pubkey` and give its address one confirmed coin
    pub fn funded(&self, pubkey: &str, amount: u64) -> String {
        let address = self
            .backend
            .add_pubkey(pubkey)
            .expect("test pubkey is valid");
        self.fund(&address, amount);
        address
    }

    pub fn fund(&self, address: &str, amount: u64) -> Utxo {
        self.backend
            .fund(address, amount, 6)
            .expect("test address is valid")
    }

    pub fn options(&self) -> ConstructOptions {
        let mut options = self.service.default_options();
        options.fee_per_kb = FEE_PER_KB;
        options
    }

    pub fn decode(&self, hex: &str) -> TxInfo {
        self.service.extractor().get_tx_info(&parse_tx(hex), None)
    }
}

pub fn parse_tx(hex: &str) -> Transaction {
    deserialize_hex(hex).expect("constructed transaction deserialises")
}
