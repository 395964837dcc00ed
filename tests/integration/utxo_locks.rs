/// Coin reservations between concurrent and consecutive `construct` calls
use crate::common::{parse_tx, TestNode, PUBKEY_2G, PUBKEY_G};
use counterparty_txcodec::backend::Utxo;
use counterparty_txcodec::config::{AppConfig, Network};
use counterparty_txcodec::errors::ConstructError;
use counterparty_txcodec::ledger::ProtocolChanges;
use counterparty_txcodec::transaction::TxRequest;
use bitcoin::{Transaction, Txid};
use std::thread;

fn request(source: &str) -> TxRequest {
    TxRequest::new(source).with_data(b"hello".to_vec())
}

#[test]
fn test_concurrent_constructs_share_nothing() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let options = node.options();
    let request = request(&source);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| scope.spawn(|| node.service.construct(&request, &options)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let built = results.iter().filter(|r| r.is_ok()).count();
    let starved = results
        .iter()
        .filter(|r| matches!(r, Err(ConstructError::Balance(_))))
        .count();
    assert_eq!((built, starved), (1, 1));
}

#[test]
fn test_lock_held_until_released() {
    let node = TestNode::new();
    let source = node.backend.add_pubkey(PUBKEY_G).unwrap();
    let coin = node.fund(&source, 100_000);
    let options = node.options();

    assert!(node.service.construct(&request(&source), &options).is_ok());
    assert_eq!(node.service.locks().locked_outpoints(&source).len(), 1);
    assert!(matches!(
        node.service.construct(&request(&source), &options),
        Err(ConstructError::Balance(_))
    ));

    node.service.locks().unlock(&source, &[coin]);
    assert!(node.service.construct(&request(&source), &options).is_ok());
}

#[test]
fn test_locks_can_be_skipped() {
    let node = TestNode::new();
    let source = node.funded(PUBKEY_G, 100_000);
    let mut options = node.options();
    options.disable_utxo_locks = true;

    let first = node.service.construct(&request(&source), &options).unwrap();
    let second = node.service.construct(&request(&source), &options).unwrap();
    assert_eq!(first, second);
    assert!(node.service.locks().locked_outpoints(&source).is_empty());
}

#[test]
fn test_zero_max_addresses_disables_locks() {
    let mut config = AppConfig::default();
    config.network = Network::Regtest;
    config.utxo_locks.max_addresses = 0;
    let node = TestNode::with_config(config, ProtocolChanges::new(Network::Regtest));
    let source = node.funded(PUBKEY_G, 100_000);

    assert!(!node.service.locks().utxo_locks_enabled());
    assert!(node.service.construct(&request(&source), &node.options()).is_ok());
    assert!(node.service.construct(&request(&source), &node.options()).is_ok());
}

#[test]
fn test_custom_inputs_bypass_locks() {
    let node = TestNode::new();
    let source = node.backend.add_pubkey(PUBKEY_G).unwrap();
    let coin = node.fund(&source, 100_000);

    assert!(node.service.construct(&request(&source), &node.options()).is_ok());

    let mut options = node.options();
    options.custom_inputs = Some(vec![coin.clone()]);
    let output = node.service.construct(&request(&source), &options).unwrap();
    let tx = parse_tx(output.hexes()[0]);
    assert_eq!(tx.input[0].previous_output, coin.outpoint());
}

fn register_pretx_output(node: &TestNode, source: &str, pretx: &Transaction, txid: Txid, vout: u32) -> Utxo {
    let output = &pretx.output[vout as usize];
    let coin = Utxo {
        txid,
        vout,
        amount: output.value.to_sat(),
        confirmations: 1,
        script_pub_key: Some(output.script_pubkey.clone()),
    };
    node.backend.add_utxo(source, coin.clone());
    coin
}

#[test]
fn test_pretx_outputs_spent_by_datatx_are_not_reselected() {
    let node = TestNode::new();
    let source = node.backend.add_pubkey(PUBKEY_G).unwrap();
    let destination = node.backend.add_pubkey(PUBKEY_2G).unwrap();
    let coin = node.fund(&source, 100_000);

    let p2sh_request = TxRequest::new(source.clone())
        .with_destination(destination, Some(5_430))
        .with_data(vec![0x42; 100]);
    let output = node.service.construct(&p2sh_request, &node.options()).unwrap();
    let pretx = parse_tx(output.hexes()[0]);
    // data, value routed back to the source for the datatx, change
    assert_eq!(pretx.output.len(), 3);

    // the pretx is broadcast: its outputs to the source become coins
    node.backend.spend(&coin.outpoint());
    let pretx_txid = node.backend.add_transaction(pretx.clone());
    register_pretx_output(&node, &source, &pretx, pretx_txid, 1);
    assert!(matches!(
        node.service.construct(&request(&source), &node.options()),
        Err(ConstructError::Balance(_))
    ));

    let change = register_pretx_output(&node, &source, &pretx, pretx_txid, 2);
    let output = node.service.construct(&request(&source), &node.options()).unwrap();
    let tx = parse_tx(output.hexes()[0]);
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].previous_output, change.outpoint());
}
