/// Chunk containers: encode with the transaction key, read back what the
/// decoder reads
use bitcoin::hashes::Hash;
use bitcoin::Txid;
use counterparty_txcodec::crypto::Obfuscator;
use counterparty_txcodec::encoding::chunk::{
    decode_length_prefixed, decode_opreturn, encode_multisig, encode_opreturn, encode_pubkeyhash,
    multisig_data_bytes,
};
use counterparty_txcodec::encoding::{chunks, fee_for_size, MULTISIG_CHUNK_SIZE, PUBKEYHASH_CHUNK_SIZE};
use counterparty_txcodec::script::address::is_valid_pubkey;
use counterparty_txcodec::types::COUNTERPARTY_PREFIX;
use proptest::prelude::*;

const DUST_KEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

fn obfuscator(seed: u8) -> Obfuscator {
    Obfuscator::for_first_input(&Txid::from_byte_array([seed; 32]))
}

fn read_multisig(first: &[u8], second: &[u8], obfuscator: &Obfuscator) -> Option<Vec<u8>> {
    let dust = hex::decode(DUST_KEY).unwrap();
    let plain = obfuscator.decrypt(&multisig_data_bytes(&[first, second, &dust[..]]));
    decode_length_prefixed(COUNTERPARTY_PREFIX, &plain)
}

#[test]
fn test_oversized_chunks_rejected() {
    let obf = obfuscator(1);
    assert!(encode_multisig(COUNTERPARTY_PREFIX, &[0u8; MULTISIG_CHUNK_SIZE + 1], &obf).is_err());
    assert!(encode_pubkeyhash(COUNTERPARTY_PREFIX, &[0u8; PUBKEYHASH_CHUNK_SIZE + 1], &obf).is_err());
}

#[test]
fn test_wrong_key_reads_nothing() {
    let (first, second) = encode_multisig(COUNTERPARTY_PREFIX, b"payload", &obfuscator(1)).unwrap();
    assert_eq!(read_multisig(&first, &second, &obfuscator(2)), None);

    let pushed = encode_opreturn(COUNTERPARTY_PREFIX, b"payload", &obfuscator(1));
    assert!(decode_opreturn(COUNTERPARTY_PREFIX, &pushed, &obfuscator(2)).is_err());
}

#[test]
fn test_chunking_and_fee_rounding() {
    let data = vec![0xab; MULTISIG_CHUNK_SIZE * 2 + 1];
    let split = chunks(&data, MULTISIG_CHUNK_SIZE);
    assert_eq!(split.iter().map(Vec::len).collect::<Vec<_>>(), vec![53, 53, 1]);

    assert_eq!(fee_for_size(214, 10_000), 2_140);
    assert_eq!(fee_for_size(1, 10_000), 10);
    assert_eq!(fee_for_size(1, 1), 1);
}

proptest! {
    #[test]
    fn prop_multisig_chunk_reads_back(
        chunk in prop::collection::vec(any::<u8>(), 0..=MULTISIG_CHUNK_SIZE),
        seed in any::<u8>(),
    ) {
        let obf = obfuscator(seed);
        let (first, second) = encode_multisig(COUNTERPARTY_PREFIX, &chunk, &obf).unwrap();
        prop_assert!(is_valid_pubkey(&first));
        prop_assert!(is_valid_pubkey(&second));
        prop_assert_eq!(read_multisig(&first, &second, &obf), Some(chunk));
    }

    #[test]
    fn prop_pubkeyhash_chunk_reads_back(
        chunk in prop::collection::vec(any::<u8>(), 0..=PUBKEYHASH_CHUNK_SIZE),
        seed in any::<u8>(),
    ) {
        let obf = obfuscator(seed);
        let hash = encode_pubkeyhash(COUNTERPARTY_PREFIX, &chunk, &obf).unwrap();
        let plain = obf.decrypt(&hash);
        prop_assert_eq!(decode_length_prefixed(COUNTERPARTY_PREFIX, &plain), Some(chunk));
    }

    #[test]
    fn prop_opreturn_reads_back(chunk in prop::collection::vec(any::<u8>(), 0..72), seed in any::<u8>()) {
        let obf = obfuscator(seed);
        let pushed = encode_opreturn(COUNTERPARTY_PREFIX, &chunk, &obf);
        prop_assert_eq!(pushed.len(), COUNTERPARTY_PREFIX.len() + chunk.len());
        prop_assert_eq!(decode_opreturn(COUNTERPARTY_PREFIX, &pushed, &obf).unwrap(), chunk);
    }
}
