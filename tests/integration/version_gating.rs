/// Behaviour that depends on protocol activation heights and node settings
use crate::common::{parse_tx, TestNode, PUBKEY_2G, PUBKEY_G};
use counterparty_txcodec::config::{AppConfig, Network};
use counterparty_txcodec::decoder::{StaticDispensers, TxInfoExtractor};
use counterparty_txcodec::encoding::{EncodingChoice, EncodingScheme};
use counterparty_txcodec::errors::{ConstructError, TransactionError};
use counterparty_txcodec::ledger::{ProtocolChanges, ProtocolFlag};
use counterparty_txcodec::script::{AddressCodec, HashKind};
use counterparty_txcodec::transaction::TxRequest;
use counterparty_txcodec::types::{TxInfo, COUNTERPARTY_PREFIX, DISPENSE_ID};
use std::collections::HashMap;
use std::sync::Arc;

#[test]
fn test_p2sh_encoding_requires_activation() {
    let node = TestNode::with_flags(ProtocolChanges::new(Network::Regtest).without(ProtocolFlag::P2shEncoding));
    let source = node.funded(PUBKEY_G, 100_000);
    let request = TxRequest::new(source).with_data(vec![0x42; 100]);

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::P2sh);
    let err = node.service.construct(&request, &options).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Transaction(TransactionError::P2shNotEnabled)
    ));

    // auto falls back to multisig
    options.encoding = EncodingChoice::Auto;
    let output = node.service.construct(&request, &options).unwrap();
    assert_eq!(parse_tx(output.hexes()[0]).output.len(), 3);
}

#[test]
fn test_p2sh_destination_needs_p2sh_addresses() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let codec = AddressCodec::new(Network::Regtest);
    let destination = codec.base58_check_encode(&[0x07; 20], HashKind::ScriptHash.version(Network::Regtest));

    let request = TxRequest::new(source)
        .with_destination(destination.clone(), None)
        .with_data(b"hello".to_vec());
    let output = node.service.construct(&request, &node.options()).unwrap();
    let hex = output.hexes()[0].to_string();

    match node.decode(&hex) {
        TxInfo::Payload(message) => {
            assert_eq!(message.destination, destination);
            assert_eq!(message.btc_amount, 546);
        }
        other => panic!("expected a payload, got {:?}", other),
    }

    let before_p2sh = TxInfoExtractor::new(
        Network::Regtest,
        COUNTERPARTY_PREFIX,
        Arc::new(ProtocolChanges::new(Network::Regtest).without(ProtocolFlag::P2shAddresses)),
        node.backend.clone(),
    );
    assert_eq!(before_p2sh.get_tx_info(&parse_tx(&hex), None), TxInfo::NotAProtocolTx);
}

#[test]
fn test_prefix_is_part_of_the_encoding() {
    let mut config = AppConfig::default();
    config.network = Network::Regtest;
    config.protocol.prefix = "TESTXCP1".to_string();
    let node = TestNode::with_config(config, ProtocolChanges::new(Network::Regtest));
    let source = node.funded(PUBKEY_G, 100_000);

    let request = TxRequest::new(source).with_data(b"hello".to_vec());
    let output = node.service.construct(&request, &node.options()).unwrap();
    let tx = parse_tx(output.hexes()[0]);

    match node.service.extractor().get_tx_info(&tx, None) {
        TxInfo::Payload(message) => assert_eq!(message.data, b"hello"),
        other => panic!("expected a payload, got {:?}", other),
    }

    let mainline = TxInfoExtractor::new(
        Network::Regtest,
        COUNTERPARTY_PREFIX,
        node.flags.clone(),
        node.backend.clone(),
    );
    assert_eq!(mainline.get_tx_info(&tx, None), TxInfo::NotAProtocolTx);
}

#[test]
fn test_dispenser_trigger_after_activation() {
    let overrides = HashMap::from([("dispensers".to_string(), 100)]);
    let flags = ProtocolChanges::new(Network::Regtest)
        .with_overrides(&overrides)
        .unwrap();
    let node = TestNode::with_flags(flags);
    let source = node.funded(PUBKEY_G, 100_000);
    let dispenser = node.backend.add_pubkey(PUBKEY_2G).unwrap();

    let request = TxRequest::new(source.clone()).with_destination(dispenser.clone(), Some(5_000));
    let output = node.service.construct(&request, &node.options()).unwrap();
    let tx = parse_tx(output.hexes()[0]);

    let dispensers = Arc::new(StaticDispensers::new());
    dispensers.open(&dispenser, 1_000);
    let extractor = TxInfoExtractor::new(
        Network::Regtest,
        COUNTERPARTY_PREFIX,
        node.flags.clone(),
        node.backend.clone(),
    )
    .with_dispensers(dispensers.clone());

    assert_eq!(extractor.get_tx_info(&tx, Some(50)), TxInfo::NotAProtocolTx);
    match extractor.get_tx_info(&tx, Some(150)) {
        TxInfo::DispenserTrigger(trigger) => {
            assert_eq!(trigger.source, source);
            assert_eq!(trigger.destination, dispenser);
            assert_eq!(trigger.btc_amount, 5_000);
            assert_eq!(trigger.data, vec![DISPENSE_ID, 0x00]);
            assert_eq!(trigger.outs.len(), 1);
            assert_eq!(trigger.outs[0].out_index, 0);
        }
        other => panic!("expected a dispenser trigger, got {:?}", other),
    }

    dispensers.close(&dispenser);
    assert_eq!(extractor.get_tx_info(&tx, Some(150)), TxInfo::NotAProtocolTx);
}

fn extractor_activating(node: &TestNode, flag: &str, height: u32) -> TxInfoExtractor {
    let overrides = HashMap::from([(flag.to_string(), height)]);
    let flags = ProtocolChanges::new(Network::Regtest)
        .with_overrides(&overrides)
        .unwrap();
    TxInfoExtractor::new(Network::Regtest, COUNTERPARTY_PREFIX, Arc::new(flags), node.backend.clone())
}

fn script_hash_address() -> String {
    let codec = AddressCodec::new(Network::Regtest);
    codec.base58_check_encode(&[0x07; 20], HashKind::ScriptHash.version(Network::Regtest))
}

#[test]
fn test_p2sh_destination_follows_transaction_height() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let destination = script_hash_address();

    let request = TxRequest::new(source.clone())
        .with_destination(destination.clone(), None)
        .with_data(b"hello".to_vec());
    let output = node.service.construct(&request, &node.options()).unwrap();
    let tx = parse_tx(output.hexes()[0]);

    let extractor = extractor_activating(&node, "p2sh_addresses", 100);
    assert_eq!(extractor.get_tx_info(&tx, Some(99)), TxInfo::NotAProtocolTx);
    match extractor.get_tx_info(&tx, Some(100)) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.destination, destination);
            assert_eq!(message.data, b"hello");
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_p2sh_dispenser_needs_p2sh_dispensers_support() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let dispenser = script_hash_address();

    let request = TxRequest::new(source.clone()).with_destination(dispenser.clone(), Some(5_000));
    let output = node.service.construct(&request, &node.options()).unwrap();
    let tx = parse_tx(output.hexes()[0]);

    let dispensers = Arc::new(StaticDispensers::new());
    dispensers.open(&dispenser, 1_000);
    let extractor = extractor_activating(&node, "p2sh_dispensers_support", 100).with_dispensers(dispensers);

    // the same script pays a dispenser only once P2SH dispensers are supported
    assert_eq!(extractor.get_tx_info(&tx, Some(99)), TxInfo::NotAProtocolTx);
    match extractor.get_tx_info(&tx, Some(100)) {
        TxInfo::DispenserTrigger(trigger) => {
            assert_eq!(trigger.source, source);
            assert_eq!(trigger.destination, dispenser);
            assert_eq!(trigger.btc_amount, 5_000);
        }
        other => panic!("expected a dispenser trigger, got {:?}", other),
    }
}
