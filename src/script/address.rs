//! Address codec
//!
//! Base58check P2PKH/P2SH addresses use the network's version bytes; segwit
//! addresses go through the `bitcoin` crate. Multisig "array" addresses are
//! the protocol's own notation: `m_item1_..._itemN_n` where each item is
//! either a pubkeyhash address or, once expanded for serialisation, a hex
//! public key.

use crate::config::Network;
use crate::errors::AddressError;
use bitcoin::base58;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::Builder;
use bitcoin::secp256k1;
use bitcoin::{CompressedPublicKey, PubkeyHash, Script, ScriptBuf, ScriptHash};
use std::str::FromStr;

pub const MULTISIG_SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy)]
pub struct AddressCodec {
    network: Network,
}

impl AddressCodec {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn base58_check_encode(&self, hash: &[u8], version: u8) -> String {
        let mut payload = Vec::with_capacity(hash.len() + 1);
        payload.push(version);
        payload.extend_from_slice(hash);
        base58::encode_check(&payload)
    }

    /// Decode and check the version byte, returning the hash
    pub fn base58_check_decode(&self, address: &str, version: u8) -> Result<Vec<u8>, AddressError> {
        let payload =
            base58::decode_check(address).map_err(|e| AddressError::Invalid(format!("{}: {}", address, e)))?;
        match payload.split_first() {
            Some((found, hash)) if *found == version => Ok(hash.to_vec()),
            Some((found, _)) => Err(AddressError::UnsupportedVersion {
                address: address.to_string(),
                version: *found,
            }),
            None => Err(AddressError::Invalid(address.to_string())),
        }
    }

    /// P2PKH address for a serialized public key
    pub fn pubkey_to_pubkeyhash(&self, pubkey: &[u8]) -> String {
        let hash = hash160::Hash::hash(pubkey);
        self.base58_check_encode(hash.as_byte_array(), self.network.address_version())
    }

    pub fn is_multisig(address: &str) -> bool {
        address.contains(MULTISIG_SEPARATOR)
    }

    pub fn is_bech32(&self, address: &str) -> bool {
        let hrp = match self.network {
            Network::Mainnet => "bc1",
            Network::Testnet => "tb1",
            Network::Regtest => "bcrt1",
        };
        address.to_lowercase().starts_with(hrp)
    }

    pub fn is_p2sh(&self, address: &str) -> bool {
        if Self::is_multisig(address) {
            return false;
        }
        matches!(
            base58::decode_check(address).as_deref(),
            Ok([version, ..]) if *version == self.network.p2sh_address_version()
        )
    }

    /// `m_sorted(items)_n`
    pub fn construct_array(required: u8, items: &[String], total: usize) -> String {
        let mut sorted = items.to_vec();
        sorted.sort();
        let mut parts = Vec::with_capacity(sorted.len() + 2);
        parts.push(required.to_string());
        parts.extend(sorted);
        parts.push(total.to_string());
        parts.join(&MULTISIG_SEPARATOR.to_string())
    }

    /// Split a multisig array into `(required, sorted items, total)`
    pub fn extract_array(address: &str) -> Result<(u8, Vec<String>, usize), AddressError> {
        let parts: Vec<&str> = address.split(MULTISIG_SEPARATOR).collect();
        let invalid = || AddressError::InvalidMultisig(address.to_string());

        if parts.len() < 3 {
            return Err(invalid());
        }
        let required: u8 = parts[0].parse().map_err(|_| invalid())?;
        let total: usize = parts[parts.len() - 1].parse().map_err(|_| invalid())?;
        let mut items: Vec<String> = parts[1..parts.len() - 1]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if required == 0 || usize::from(required) > total || items.len() != total || total > 3 {
            return Err(invalid());
        }
        items.sort();
        Ok((required, items, total))
    }

    pub fn validate(&self, address: &str) -> Result<(), AddressError> {
        if Self::is_multisig(address) {
            let (_, items, _) = Self::extract_array(address)?;
            for item in &items {
                if !is_pubkey_hex(item) {
                    self.validate_singlesig(item)?;
                }
            }
            return Ok(());
        }
        self.validate_singlesig(address)
    }

    fn validate_singlesig(&self, address: &str) -> Result<(), AddressError> {
        self.address_to_script(address).map(|_| ())
    }

    /// Canonical form used when comparing addresses
    ///
    /// Multisig arrays are rewritten in sorted pubkeyhash form, bech32 is
    /// lowercased and base58 addresses are returned as is.
    pub fn make_canonical(&self, address: &str) -> Result<String, AddressError> {
        if Self::is_multisig(address) {
            let (required, items, total) = Self::extract_array(address)?;
            let mut pubkeyhashes = Vec::with_capacity(items.len());
            for item in items {
                if is_pubkey_hex(&item) {
                    let bytes = hex::decode(&item).map_err(|_| AddressError::InvalidPubkey(item.clone()))?;
                    pubkeyhashes.push(self.pubkey_to_pubkeyhash(&bytes));
                } else {
                    self.validate_singlesig(&item)?;
                    pubkeyhashes.push(item);
                }
            }
            return Ok(Self::construct_array(required, &pubkeyhashes, total));
        }
        if self.is_bech32(address) {
            return Ok(address.to_lowercase());
        }
        Ok(address.to_string())
    }

    pub fn script_to_address(&self, script: &Script) -> Result<String, AddressError> {
        bitcoin::Address::from_script(script, self.network.to_bitcoin())
            .map(|address| address.to_string())
            .map_err(|e| AddressError::Invalid(format!("{}: {}", hex::encode(script.as_bytes()), e)))
    }

    /// Output script paying `address`
    ///
    /// Multisig arrays must already be expanded to public keys.
    pub fn address_to_script(&self, address: &str) -> Result<ScriptBuf, AddressError> {
        if Self::is_multisig(address) {
            return self.multisig_script(address);
        }

        if let Ok(payload) = base58::decode_check(address) {
            let (version, hash) = payload
                .split_first()
                .ok_or_else(|| AddressError::Invalid(address.to_string()))?;
            let hash: [u8; 20] = hash
                .try_into()
                .map_err(|_| AddressError::Invalid(address.to_string()))?;

            return if *version == self.network.address_version() {
                Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)))
            } else if *version == self.network.p2sh_address_version() {
                Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)))
            } else {
                Err(AddressError::UnsupportedVersion {
                    address: address.to_string(),
                    version: *version,
                })
            };
        }

        let parsed = bitcoin::Address::from_str(address)
            .map_err(|e| AddressError::Invalid(format!("{}: {}", address, e)))?
            .require_network(self.network.to_bitcoin())
            .map_err(|e| AddressError::Invalid(format!("{}: {}", address, e)))?;
        Ok(parsed.script_pubkey())
    }

    fn multisig_script(&self, address: &str) -> Result<ScriptBuf, AddressError> {
        let (required, pubkeys, total) = Self::extract_array(address)?;
        let mut builder = Builder::new().push_int(i64::from(required));
        for pubkey in &pubkeys {
            let key = parse_pubkey(pubkey)?;
            builder = builder.push_key(&key);
        }
        Ok(builder
            .push_int(total as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script())
    }

    /// Find the public key behind a pubkeyhash (or P2WPKH) address among `provided`
    pub fn pubkeyhash_to_pubkey(&self, address: &str, provided: &[String]) -> Option<String> {
        provided
            .iter()
            .find(|pubkey| {
                let Ok(bytes) = hex::decode(pubkey) else {
                    return false;
                };
                if self.pubkey_to_pubkeyhash(&bytes) == address {
                    return true;
                }
                self.is_bech32(address) && self.pubkey_to_p2wpkh(&bytes).as_deref() == Some(address)
            })
            .cloned()
    }

    /// Native segwit address for a compressed public key
    /// P2WPKH address of `pubkey`; `None` unless it is a valid compressed key
    pub fn pubkey_to_p2wpkh(&self, pubkey: &[u8]) -> Option<String> {
        let key = CompressedPublicKey::from_slice(pubkey).ok()?;
        self.script_to_address(&ScriptBuf::new_p2wpkh(&key.wpubkey_hash())).ok()
    }

    /// Rewrite a pubkeyhash multisig array with public keys
    ///
    /// `resolve` maps a single address to its hex public key. Items that
    /// already are public keys pass through.
    pub fn multisig_pubkeyhashes_to_pubkeys<E, F>(&self, address: &str, mut resolve: F) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<String, E>,
        E: From<AddressError>,
    {
        let (required, items, total) = Self::extract_array(address)?;
        let mut pubkeys = Vec::with_capacity(items.len());
        for item in items {
            if is_pubkey_hex(&item) {
                pubkeys.push(item);
            } else {
                pubkeys.push(resolve(&item)?);
            }
        }
        Ok(Self::construct_array(required, &pubkeys, total))
    }
}

/// Is `s` a hex encoded valid secp256k1 public key?
pub fn is_pubkey_hex(s: &str) -> bool {
    parse_pubkey(s).is_ok()
}

fn parse_pubkey(s: &str) -> Result<bitcoin::PublicKey, AddressError> {
    let bytes = hex::decode(s).map_err(|_| AddressError::InvalidPubkey(s.to_string()))?;
    bitcoin::PublicKey::from_slice(&bytes).map_err(|_| AddressError::InvalidPubkey(s.to_string()))
}

/// Is `bytes` a valid serialized secp256k1 public key?
pub fn is_valid_pubkey(bytes: &[u8]) -> bool {
    secp256k1::PublicKey::from_slice(bytes).is_ok()
}
