/// A rock-paper-scissors resolution composed, constructed, decoded and parsed
use crate::common::{TestNode, PUBKEY_2G, PUBKEY_G};
use counterparty_txcodec::encoding::{EncodingChoice, EncodingScheme};
use counterparty_txcodec::messages::rpsresolve::{self, move_random_hash};
use counterparty_txcodec::messages::{Player, RpsMatch};
use counterparty_txcodec::types::TxInfo;

const RANDOM: &str = "7a1c9e04b3d2f68e5a4c3b2a19087f6e";
const TX0: &str = "3f5d7c1e9b0a8f6e4d2c0b1a9e8f7d6c5b4a39281706f5e4d3c2b1a098765432";
const TX1: &str = "0123456789abcdeffedcba98765432100123456789abcdeffedcba9876543210";

fn pending_match(tx0_address: &str, tx1_address: &str) -> RpsMatch {
    let random = hex::decode(RANDOM).unwrap();
    RpsMatch {
        id: format!("{}_{}", TX0, TX1),
        tx0_address: tx0_address.to_string(),
        tx1_address: tx1_address.to_string(),
        tx0_move_random_hash: move_random_hash(3, &random),
        tx1_move_random_hash: move_random_hash(1, &random),
        possible_moves: 5,
        status: "pending".to_string(),
        match_expire_index: 1_000,
    }
}

#[test]
fn test_resolution_survives_the_chain() {
    let node = TestNode::new();
    let alice = node.funded(PUBKEY_G, 100_000);
    let bob = node.backend.add_pubkey(PUBKEY_2G).unwrap();
    let game = pending_match(&alice, &bob);

    let request = rpsresolve::compose(&alice, 3, RANDOM, &game.id, Some(&game), 990).unwrap();
    let mut options = node.options();
    options.encoding = EncodingChoice::Explicit(EncodingScheme::Multisig);
    let output = node.service.construct(&request, &options).unwrap();

    let message = match node.decode(output.hexes()[0]) {
        TxInfo::Payload(message) => message,
        other => panic!("expected a payload, got {:?}", other),
    };
    assert_eq!(message.source, alice);
    assert_eq!(message.data[0], rpsresolve::ID as u8);

    let (resolve, player, status) = rpsresolve::parse(&message.source, &message.data[1..], Some(&game));
    assert_eq!(status, "valid");
    assert_eq!(player, Some(Player::First));
    let resolve = resolve.unwrap();
    assert_eq!(resolve.game_move, 3);
    assert_eq!(resolve.rps_match_id(), game.id);

    // the same bytes claimed by the other player do not match bob's commitment
    let (_, player, status) = rpsresolve::parse(&bob, &message.data[1..], Some(&game));
    assert_eq!(player, None);
    assert_eq!(status, "invalid: invalid move or random value");
}
