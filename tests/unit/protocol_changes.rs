/// Activation tables and per-height extraction rules
use counterparty_txcodec::config::Network;
use counterparty_txcodec::ledger::{ProtocolChanges, ProtocolFlag, ProtocolFlags};
use std::collections::HashMap;

#[test]
fn test_mainnet_ladder() {
    let flags = ProtocolChanges::new(Network::Mainnet);
    assert!(!flags.enabled(ProtocolFlag::MultisigAddresses, 333_499));
    assert!(flags.enabled(ProtocolFlag::MultisigAddresses, 333_500));
    assert!(!flags.enabled(ProtocolFlag::P2shAddresses, 478_999));
    assert!(flags.enabled(ProtocolFlag::P2shAddresses, 479_000));
    assert!(flags.enabled(ProtocolFlag::Dispensers, 624_000));
    assert!(!flags.enabled(ProtocolFlag::MultipleDispenses, 753_499));
}

#[test]
fn test_regtest_enables_everything() {
    let flags = ProtocolChanges::new(Network::Regtest);
    for flag in ProtocolFlag::ALL {
        assert!(flags.enabled(flag, 0), "{} should be active", flag.name());
    }
    let flags = flags.without(ProtocolFlag::P2shEncoding);
    assert!(!flags.enabled(ProtocolFlag::P2shEncoding, u32::MAX));
}

#[test]
fn test_overrides_and_current_height() {
    let overrides = HashMap::from([("segwit_support".to_string(), 10)]);
    let flags = ProtocolChanges::new(Network::Regtest)
        .with_overrides(&overrides)
        .unwrap();
    assert_eq!(flags.activation_height(ProtocolFlag::SegwitSupport), Some(10));
    assert!(!flags.enabled_now(ProtocolFlag::SegwitSupport));
    flags.set_current_block_index(10);
    assert_eq!(flags.current_block_index(), 10);
    assert!(flags.enabled_now(ProtocolFlag::SegwitSupport));

    let unknown = HashMap::from([("warp_drive".to_string(), 1)]);
    assert!(ProtocolChanges::new(Network::Regtest)
        .with_overrides(&unknown)
        .is_err());
}
