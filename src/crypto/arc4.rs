/// ARC4 obfuscation keyed by a transaction's first input
///
/// Counterparty hides payload bytes inside otherwise valid looking pubkeys,
/// pubkeyhashes and OP_RETURN pushes by running them through ARC4. The key is
/// the hash of the outpoint spent by the transaction's first input, in display
/// (byte-reversed) order, so every transaction carries its own key.
///
/// # Usage
///
/// ```rust
/// use counterparty_txcodec::crypto::arc4;
///
/// let key = hex::decode("abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890").unwrap();
/// let data = b"hello world";
///
/// let encrypted = arc4::apply(data, &key).unwrap();
/// let decrypted = arc4::apply(&encrypted, &key).unwrap();
/// assert_eq!(decrypted, data);
/// ```
use bitcoin::hashes::Hash;
use bitcoin::Transaction;
use rc4::{consts::U32, Key, KeyInit, Rc4, StreamCipher};

/// Run the ARC4 keystream over `data`
///
/// ARC4 is symmetric, so this both obfuscates and deobfuscates. Returns
/// `None` if the key is not exactly 32 bytes. Empty data yields empty output.
pub fn apply(data: &[u8], key: &[u8]) -> Option<Vec<u8>> {
    if key.len() != 32 {
        return None;
    }

    let rc4_key = Key::<U32>::from_slice(key);
    let mut cipher = Rc4::new(rc4_key);
    let mut result = data.to_vec();
    cipher.apply_keystream(&mut result);

    Some(result)
}

/// Key material for a transaction: the first input's previous txid, reversed
///
/// Returns `None` for a transaction without inputs.
pub fn key_for(tx: &Transaction) -> Option<[u8; 32]> {
    let first = tx.input.first()?;
    let mut key = first.previous_output.txid.to_byte_array();
    key.reverse();
    Some(key)
}

/// Keyed codec bound to one transaction
#[derive(Debug, Clone, Copy)]
pub struct Obfuscator {
    key: [u8; 32],
}

impl Obfuscator {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Bind to the transaction being decoded
    pub fn for_transaction(tx: &Transaction) -> Option<Self> {
        key_for(tx).map(Self::new)
    }

    /// Bind to a transaction whose first input spends `txid`
    pub fn for_first_input(txid: &bitcoin::Txid) -> Self {
        let mut key = txid.to_byte_array();
        key.reverse();
        Self::new(key)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        // key length is fixed at 32, so the keystream always applies
        apply(ciphertext, &self.key).unwrap_or_default()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        self.decrypt(plaintext)
    }
}
