/// Two-phase P2SH construction: a funding pretx whose P2SH outputs carry the
/// data, then a datatx spending them and marking itself with an OP_RETURN
use crate::common::{parse_tx, TestNode, PUBKEY_2G, PUBKEY_G};
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::OutPoint;
use counterparty_txcodec::encoding::{EncodingChoice, EncodingScheme};
use counterparty_txcodec::errors::{ConstructError, TransactionError};
use counterparty_txcodec::transaction::{ConstructOutput, TxRequest};
use counterparty_txcodec::types::TxInfo;

fn payload() -> Vec<u8> {
    (0..100u8).map(|i| i.wrapping_mul(7)).collect()
}

fn only_hex(output: ConstructOutput) -> String {
    match output {
        ConstructOutput::Hex(hex) => hex,
        other => panic!("expected a single transaction, got {:?}", other),
    }
}

#[test]
fn test_pretx_then_datatx() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let request = TxRequest::new(source.clone()).with_data(payload());

    // auto picks P2SH for data too large for OP_RETURN
    let mut options = node.options();
    let pretx = parse_tx(&only_hex(node.service.construct(&request, &options).unwrap()));
    assert_eq!(pretx.output.len(), 2);
    assert!(pretx.output[0].script_pubkey.is_p2sh());
    assert_eq!(pretx.output[0].value.to_sat(), 5_020);
    assert_eq!(pretx.output[1].value.to_sat(), 92_680);

    let pretx_txid = node.backend.add_transaction(pretx);
    options.p2sh_pretx_txid = Some(pretx_txid);
    let datatx_hex = only_hex(node.service.construct(&request, &options).unwrap());

    let datatx = parse_tx(&datatx_hex);
    assert_eq!(
        datatx.input[0].previous_output,
        OutPoint {
            txid: pretx_txid,
            vout: 0
        }
    );
    assert_eq!(datatx.output.len(), 1);
    assert!(datatx.output[0].script_pubkey.is_op_return());
    assert_eq!(datatx.output[0].value.to_sat(), 0);

    match node.decode(&datatx_hex) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.destination, "");
            assert_eq!(message.fee, 5_020);
            assert_eq!(message.data, payload());
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_segwit_returns_both_transactions() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let request = TxRequest::new(source.clone()).with_data(payload());

    let mut options = node.options();
    options.segwit = true;
    let hexes = match node.service.construct(&request, &options).unwrap() {
        ConstructOutput::Hexes(hexes) => hexes,
        other => panic!("expected two transactions, got {:?}", other),
    };
    assert_eq!(hexes.len(), 2);

    let pretx = parse_tx(&hexes[0]);
    let datatx = parse_tx(&hexes[1]);
    assert_eq!(datatx.input[0].previous_output.txid, pretx.compute_txid());

    node.backend.add_transaction(pretx);
    match node.decode(&hexes[1]) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.data, payload());
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_destination_value_routes_through_pretx() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let destination = node.backend.add_pubkey(PUBKEY_2G).unwrap();
    let request = TxRequest::new(source.clone())
        .with_destination(destination.clone(), Some(5_430))
        .with_data(payload());

    let mut options = node.options();
    options.segwit = true;
    let output = node.service.construct(&request, &options).unwrap();
    let hexes = output.hexes();
    let pretx = parse_tx(hexes[0]);
    let datatx = parse_tx(hexes[1]);

    assert_eq!(pretx.output.len(), 3);
    assert_eq!(pretx.output[0].value.to_sat(), 5_360);
    assert_eq!(pretx.output[1].value.to_sat(), 5_430);
    assert_eq!(pretx.output[2].value.to_sat(), 86_570);
    assert_eq!(datatx.input.len(), 2);
    assert_eq!(datatx.input[1].previous_output.vout, 1);

    node.backend.add_transaction(pretx);
    match node.decode(&serialize_hex(&datatx)) {
        TxInfo::Payload(message) => {
            assert_eq!(message.source, source);
            assert_eq!(message.destination, destination);
            assert_eq!(message.btc_amount, 5_430);
            assert_eq!(message.fee, 5_360);
            assert_eq!(message.data, payload());
        }
        other => panic!("expected a payload, got {:?}", other),
    }
}

#[test]
fn test_exact_fee_is_split_between_phases() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let request = TxRequest::new(source).with_data(payload());

    let mut options = node.options();
    options.exact_fee = Some(3_000);
    let err = node.service.construct(&request, &options).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Transaction(TransactionError::ExactFeeTooLow { .. })
    ));

    options.exact_fee = Some(10_000);
    let pretx = parse_tx(&only_hex(node.service.construct(&request, &options).unwrap()));
    // 5 020 for the datatx rides in the data output, the pretx keeps 4 980
    assert_eq!(pretx.output[0].value.to_sat(), 5_020);
    assert_eq!(pretx.output[1].value.to_sat(), 90_000);
}

#[test]
fn test_old_style_api_rejects_two_transactions() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let request = TxRequest::new(source).with_data(payload());

    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::P2sh);
    options.old_style_api = Some(true);
    options.segwit = true;
    let err = node.service.construct(&request, &options).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Transaction(TransactionError::OldStyleApiMultipleTxs)
    ));
}

#[test]
fn test_segwit_with_pretx_txid_rejected() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let pretx_txid = node.fund(&source, 50_000).txid;
    let request = TxRequest::new(source).with_data(payload());

    let mut options = node.options();
    options.segwit = true;
    options.p2sh_pretx_txid = Some(pretx_txid);
    let err = node.service.construct(&request, &options).unwrap_err();
    assert!(matches!(
        err,
        ConstructError::Transaction(TransactionError::SegwitWithPretx)
    ));
}
