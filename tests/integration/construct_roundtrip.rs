/// Construct-then-decode tests for the single transaction encodings
///
/// Amounts assume a 10 000 sat/kB fee rate: a transaction is charged
/// 181 bytes per input, 10 bytes of overhead and the size of its
/// destination and data outputs.
use crate::common::{parse_tx, TestNode, PUBKEY_2G, PUBKEY_3G, PUBKEY_G};
use bitcoin::script::Instruction;
use bitcoin::Transaction;
use counterparty_txcodec::config::{AppConfig, Network};
use counterparty_txcodec::encoding::{EncodingChoice, EncodingScheme};
use counterparty_txcodec::errors::{BackendError, ConstructError, TransactionError};
use counterparty_txcodec::ledger::ProtocolChanges;
use counterparty_txcodec::script::AddressCodec;
use counterparty_txcodec::transaction::{ConstructOutput, DustReturnPubkey, ExtendedTxInfo, TxRequest};
use counterparty_txcodec::types::TxInfo;
use proptest::prelude::*;

fn extended(output: ConstructOutput) -> ExtendedTxInfo {
    match output {
        ConstructOutput::Extended(info) => info,
        other => panic!("expected extended tx info, got {:?}", other),
    }
}

fn single_hex(output: &ConstructOutput) -> String {
    match output {
        ConstructOutput::Hex(hex) => hex.clone(),
        other => panic!("expected a single transaction, got {:?}", other),
    }
}

fn pushes(script: &bitcoin::Script) -> Vec<Vec<u8>> {
    script
        .instructions()
        .filter_map(|instruction| match instruction {
            Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes().to_vec()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_opreturn_fee_change_and_decode() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);

    let mut options = node.options();
    options.extended_tx_info = true;
    let request = TxRequest::new(source.clone()).with_data(b"hello".to_vec());
    let info = extended(node.service.construct(&request, &options).unwrap());

    assert_eq!(info.btc_in, 100_000);
    assert_eq!(info.btc_out, 0);
    assert_eq!(info.btc_fee, 2_140);
    assert_eq!(info.btc_change, 97_860);

    let tx = parse_tx(&info.tx_hex);
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.output.len(), 2);
    assert!(tx.output[0].script_pubkey.is_op_return());
    assert!(tx.input.iter().all(|input| input.witness.is_empty()));

    match node.decode(&info.tx_hex) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.destination, "");
            assert_eq!(message.btc_amount, 0);
            assert_eq!(message.fee, 2_140);
            assert_eq!(message.data, b"hello");
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_dust_change_goes_to_fee() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 2_500);

    let mut options = node.options();
    options.extended_tx_info = true;
    let request = TxRequest::new(source).with_data(b"hello".to_vec());
    let info = extended(node.service.construct(&request, &options).unwrap());

    assert_eq!(info.btc_fee, 2_500);
    assert_eq!(info.btc_change, 0);
    assert_eq!(parse_tx(&info.tx_hex).output.len(), 1);
}

#[test]
fn test_multisig_chunks_and_dust_key() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let data: Vec<u8> = (0..60).collect();

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::Multisig);
    options.extended_tx_info = true;
    let request = TxRequest::new(source.clone()).with_data(data.clone());
    let info = extended(node.service.construct(&request, &options).unwrap());

    assert_eq!(info.btc_out, 2_000);
    assert_eq!(info.btc_fee, 3_530);
    assert_eq!(info.btc_change, 94_470);

    let tx = parse_tx(&info.tx_hex);
    assert_eq!(tx.output.len(), 3);
    for output in &tx.output[..2] {
        assert_eq!(output.value.to_sat(), 1_000);
        let keys = pushes(&output.script_pubkey);
        assert_eq!(keys.len(), 3);
        assert_eq!(hex::encode(&keys[2]), PUBKEY_G);
    }

    match node.decode(&info.tx_hex) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.data, data);
            assert_eq!(message.fee, 3_530);
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_explicit_dust_return_pubkey() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::Multisig);
    options.dust_return_pubkey = DustReturnPubkey::Explicit(PUBKEY_3G.to_string());
    let request = TxRequest::new(source).with_data(vec![0x14; 20]);
    let hex = single_hex(&node.service.construct(&request, &options).unwrap());

    let keys = pushes(&parse_tx(&hex).output[0].script_pubkey);
    assert_eq!(hex::encode(&keys[2]), PUBKEY_3G);
}

#[test]
fn test_node_default_dust_key_must_be_configured() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::Multisig);
    options.dust_return_pubkey = DustReturnPubkey::NodeDefault;
    let request = TxRequest::new(source).with_data(vec![0x14; 20]);
    let err = node.service.construct(&request, &options).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Transaction(TransactionError::MissingDustReturnPubkey)
    ));
}

#[test]
fn test_node_default_dust_key_from_config() {
    let mut config = AppConfig::default();
    config.network = Network::Regtest;
    config.protocol.p2sh_dust_return_pubkey = Some(PUBKEY_3G.to_string());
    let node = TestNode::with_config(config, ProtocolChanges::new(Network::Regtest));
    let source = node.funded(PUBKEY_G, 100_000);

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::Multisig);
    options.dust_return_pubkey = DustReturnPubkey::NodeDefault;
    let request = TxRequest::new(source.clone()).with_data(vec![0x14; 20]);
    let hex = single_hex(&node.service.construct(&request, &options).unwrap());

    let keys = pushes(&parse_tx(&hex).output[0].script_pubkey);
    assert_eq!(hex::encode(&keys[2]), PUBKEY_3G);
    match node.decode(&hex) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.data, vec![0x14; 20]);
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_malformed_dust_return_pubkey() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::Multisig);
    options.dust_return_pubkey = DustReturnPubkey::Explicit("02zz".to_string());
    let request = TxRequest::new(source.clone()).with_data(vec![0x14; 20]);
    let err = node.service.construct(&request, &options).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Transaction(TransactionError::InvalidDustReturnPubkey(ref key)) if key == "02zz"
    ));
    // nothing stays reserved after a rejected request
    assert!(node.service.locks().locked_outpoints(&source).is_empty());
}

#[test]
fn test_unknown_pubkey_and_provided_pubkeys() {
    let node = TestNode::new();
    let codec = AddressCodec::new(Network::Regtest);
    let source = codec.pubkey_to_pubkeyhash(&hex::decode(PUBKEY_2G).unwrap());
    node.fund(&source, 100_000);

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::Multisig);
    let request = TxRequest::new(source.clone()).with_data(vec![0x14; 20]);
    let err = node.service.construct(&request, &options).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Backend(BackendError::PubkeyNotFound(ref address)) if *address == source
    ));

    options.provided_pubkeys = vec![PUBKEY_2G.to_string()];
    let hex = single_hex(&node.service.construct(&request, &options).unwrap());
    let keys = pushes(&parse_tx(&hex).output[0].script_pubkey);
    assert_eq!(hex::encode(&keys[2]), PUBKEY_2G);
}

#[test]
fn test_pubkeyhash_chunks_decode() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let data = b"pubkeyhash carried payload".to_vec();

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::PubKeyHash);
    let request = TxRequest::new(source.clone()).with_data(data.clone());
    let hex = single_hex(&node.service.construct(&request, &options).unwrap());

    let tx = parse_tx(&hex);
    // three 546 sat data outputs plus change
    assert_eq!(tx.output.len(), 4);
    assert!(tx.output[..3].iter().all(|output| output.value.to_sat() == 546));

    match node.decode(&hex) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.data, data);
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_destination_with_data() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let destination = node.backend.add_pubkey(PUBKEY_2G).unwrap();

    let mut options = node.options();
    options.extended_tx_info = true;
    let request = TxRequest::new(source.clone())
        .with_destination(destination.clone(), Some(5_430))
        .with_data(b"hello".to_vec());
    let info = extended(node.service.construct(&request, &options).unwrap());

    assert_eq!(info.btc_out, 5_430);
    assert_eq!(info.btc_fee, 2_480);

    match node.decode(&info.tx_hex) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.destination, destination);
            assert_eq!(message.btc_amount, 5_430);
            assert_eq!(message.data, b"hello");
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_btc_only_send_is_not_a_protocol_tx() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let destination = node.backend.add_pubkey(PUBKEY_2G).unwrap();

    let mut options = node.options();
    options.extended_tx_info = true;
    let request = TxRequest::new(source).with_destination(destination, Some(10_000));
    let info = extended(node.service.construct(&request, &options).unwrap());

    assert_eq!(info.btc_fee, 2_250);
    assert_eq!(info.btc_change, 87_750);
    assert_eq!(node.decode(&info.tx_hex), TxInfo::NotAProtocolTx);
}

#[test]
fn test_dust_destination_rejected() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let destination = node.backend.add_pubkey(PUBKEY_2G).unwrap();

    let request = TxRequest::new(source).with_destination(destination, Some(100));
    let err = node.service.construct(&request, &node.options()).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Transaction(TransactionError::DustDestination)
    ));
}

#[test]
fn test_insufficient_funds() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 1_000);

    let request = TxRequest::new(source.clone()).with_data(b"hello".to_vec());
    match node.service.construct(&request, &node.options()) {
        Err(ConstructError::Balance(err)) => {
            assert_eq!(err.address, source);
            assert!(err.message.starts_with("Insufficient BTC at address"));
        }
        other => panic!("expected a balance error, got {:?}", other),
    }
}

#[test]
fn test_unconfirmed_coins_need_opt_in() {
    let node = TestNode::new();
    let source = node.backend.add_pubkey(PUBKEY_G).unwrap();
    node.backend.fund(&source, 100_000, 0).unwrap();

    let request = TxRequest::new(source).with_data(b"hello".to_vec());
    let err = node.service.construct(&request, &node.options()).unwrap_err();
    assert!(matches!(err, ConstructError::Balance(_)));

    let mut options = node.options();
    options.allow_unconfirmed_inputs = true;
    assert!(node.service.construct(&request, &options).is_ok());
}

#[test]
fn test_estimated_and_exact_fees() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let request = TxRequest::new(source).with_data(b"hello".to_vec());

    node.backend.set_fee_estimate(Some(50_000));
    let mut options = node.options();
    options.extended_tx_info = true;
    options.estimate_fee_per_kb = true;
    options.disable_utxo_locks = true;
    let info = extended(node.service.construct(&request, &options).unwrap());
    assert_eq!(info.btc_fee, 10_700);

    options.estimate_fee_per_kb = false;
    options.exact_fee = Some(5_000);
    let info = extended(node.service.construct(&request, &options).unwrap());
    assert_eq!(info.btc_fee, 5_000);
    assert_eq!(info.btc_change, 95_000);
}

#[test]
fn test_old_style_api_falls_back_to_multisig() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);

    let mut options = node.options();
    options.old_style_api = Some(true);
    let request = TxRequest::new(source).with_data(vec![0x42; 100]);
    let hex = single_hex(&node.service.construct(&request, &options).unwrap());

    let tx = parse_tx(&hex);
    assert_eq!(tx.output.len(), 3);
    assert!(tx.output[..2].iter().all(|output| output.value.to_sat() == 1_000));
}

#[test]
fn test_opreturn_too_large() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::OpReturn);
    let request = TxRequest::new(source).with_data(vec![0x42; 73]);
    let err = node.service.construct(&request, &options).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Transaction(TransactionError::OpReturnTooLarge)
    ));
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Build with one funded coin, then decode; change is always present
fn roundtrip(scheme: EncodingScheme, data: &[u8]) -> (Transaction, TxInfo) {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 10_000_000);
    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(scheme);
    let request = TxRequest::new(source).with_data(data.to_vec());
    let hex = single_hex(&node.service.construct(&request, &options).unwrap());
    (parse_tx(&hex), node.decode(&hex))
}

/// Build pretx and datatx together, register the pretx, decode the datatx
fn p2sh_roundtrip(data: &[u8]) -> (Transaction, TxInfo) {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 10_000_000);
    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::P2sh);
    options.segwit = true;
    let request = TxRequest::new(source).with_data(data.to_vec());
    let output = node.service.construct(&request, &options).unwrap();
    let hexes = output.hexes();
    assert_eq!(hexes.len(), 2);

    let pretx = parse_tx(hexes[0]);
    node.backend.add_transaction(pretx.clone());
    (pretx, node.decode(hexes[1]))
}

fn decoded_data(info: TxInfo) -> Vec<u8> {
    match info {
        TxInfo::Payload(message) => message.data,
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_chunk_boundaries_roundtrip() {
    // (scheme, payload length, data outputs)
    let cases = [
        (EncodingScheme::Multisig, 1, 1),
        (EncodingScheme::Multisig, 52, 1),
        (EncodingScheme::Multisig, 53, 1),
        (EncodingScheme::Multisig, 54, 2),
        (EncodingScheme::Multisig, 106, 2),
        (EncodingScheme::Multisig, 107, 3),
        (EncodingScheme::PubKeyHash, 1, 1),
        (EncodingScheme::PubKeyHash, 10, 1),
        (EncodingScheme::PubKeyHash, 11, 1),
        (EncodingScheme::PubKeyHash, 12, 2),
        (EncodingScheme::PubKeyHash, 33, 3),
        (EncodingScheme::OpReturn, 1, 1),
        (EncodingScheme::OpReturn, 72, 1),
    ];
    for (scheme, len, outputs) in cases {
        let data = payload(len);
        let (tx, info) = roundtrip(scheme, &data);
        assert_eq!(tx.output.len(), outputs + 1, "{} with {} bytes", scheme, len);
        assert_eq!(decoded_data(info), data, "{} with {} bytes", scheme, len);
    }
}

#[test]
fn test_p2sh_chunk_boundaries_roundtrip() {
    // a compressed owner key leaves 467 bytes per redeem script
    for (len, outputs) in [(1, 1), (466, 1), (467, 1), (468, 2), (934, 2), (935, 3), (2_000, 5)] {
        let data = payload(len);
        let (pretx, info) = p2sh_roundtrip(&data);
        let data_outputs = pretx
            .output
            .iter()
            .filter(|output| output.script_pubkey.is_p2sh())
            .count();
        assert_eq!(data_outputs, outputs, "{} bytes", len);
        assert_eq!(decoded_data(info), data, "{} bytes", len);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_multisig_roundtrip(data in prop::collection::vec(any::<u8>(), 1..160)) {
        match roundtrip(EncodingScheme::Multisig, &data).1 {
            TxInfo::Payload(message) => prop_assert_eq!(message.data, data),
            other => prop_assert!(false, "expected a payload, got {:?}", other),
        }
    }

    #[test]
    fn prop_pubkeyhash_roundtrip(data in prop::collection::vec(any::<u8>(), 1..45)) {
        match roundtrip(EncodingScheme::PubKeyHash, &data).1 {
            TxInfo::Payload(message) => prop_assert_eq!(message.data, data),
            other => prop_assert!(false, "expected a payload, got {:?}", other),
        }
    }

    #[test]
    fn prop_opreturn_roundtrip(data in prop::collection::vec(any::<u8>(), 1..=72)) {
        match roundtrip(EncodingScheme::OpReturn, &data).1 {
            TxInfo::Payload(message) => prop_assert_eq!(message.data, data),
            other => prop_assert!(false, "expected a payload, got {:?}", other),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_p2sh_roundtrip(data in prop::collection::vec(any::<u8>(), 1..1_500)) {
        match p2sh_roundtrip(&data).1 {
            TxInfo::Payload(message) => prop_assert_eq!(message.data, data),
            other => prop_assert!(false, "expected a payload, got {:?}", other),
        }
    }
}
