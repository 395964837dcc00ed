//! Unsigned transaction assembly
//!
//! Inputs carry the scriptPubKey of the output they spend in place of a
//! signature, which is what wallets expect when asked to sign. Outputs are
//! laid out as destinations, data, change; the decoder relies on that order.

use super::chunk::{encode_multisig, encode_opreturn, encode_pubkeyhash};
use super::p2sh::{make_redeem_script, unsigned_data_script_sig, DataOwner, MAX_DATA_CHUNKS};
use super::EncodingScheme;
use crate::backend::Utxo;
use crate::crypto::Obfuscator;
use crate::errors::{ConstructResult, TransactionError};
use crate::script::{push_bytes, AddressCodec};
use crate::types::P2SH_MARKER;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_RETURN};
use bitcoin::script::Builder;
use bitcoin::{
    absolute, transaction, Amount, OutPoint, PubkeyHash, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness,
};

/// Data to embed, already split for its scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataOutput {
    pub scheme: EncodingScheme,
    pub chunks: Vec<Vec<u8>>,
    /// Value of every data output
    pub value: u64,
}

pub struct Serializer<'a> {
    codec: &'a AddressCodec,
    prefix: &'a [u8],
}

fn serialisation(message: impl Into<String>) -> TransactionError {
    TransactionError::Serialisation(message.into())
}

fn unsigned_input(outpoint: OutPoint, script_sig: ScriptBuf) -> TxIn {
    TxIn {
        previous_output: outpoint,
        script_sig,
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

fn utxo_input(utxo: &Utxo) -> TxIn {
    unsigned_input(utxo.outpoint(), utxo.script_pub_key.clone().unwrap_or_default())
}

fn output(script_pubkey: ScriptBuf, value: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey,
    }
}

fn unsigned_transaction(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input,
        output,
    }
}

impl<'a> Serializer<'a> {
    pub fn new(codec: &'a AddressCodec, prefix: &'a [u8]) -> Self {
        Self { codec, prefix }
    }

    fn address_outputs(&self, outputs: &[(String, u64)]) -> ConstructResult<Vec<TxOut>> {
        outputs
            .iter()
            .map(|(address, value)| -> ConstructResult<TxOut> {
                Ok(output(self.codec.address_to_script(address)?, *value))
            })
            .collect()
    }

    fn opreturn_script(&self, chunk: &[u8], obfuscator: &Obfuscator) -> Result<ScriptBuf, TransactionError> {
        let pushed = encode_opreturn(self.prefix, chunk, obfuscator);
        Ok(Builder::new()
            .push_opcode(OP_RETURN)
            .push_slice(push_bytes(&pushed).map_err(serialisation)?)
            .into_script())
    }

    fn data_outputs(
        &self,
        data: &DataOutput,
        obfuscator: &Obfuscator,
        dust_return_pubkey: Option<&[u8]>,
    ) -> Result<Vec<TxOut>, TransactionError> {
        let mut outputs = Vec::with_capacity(data.chunks.len());
        for chunk in &data.chunks {
            let script = match data.scheme {
                EncodingScheme::OpReturn => self.opreturn_script(chunk, obfuscator)?,
                EncodingScheme::Multisig => {
                    let dust_key = dust_return_pubkey.ok_or(TransactionError::MissingDustReturnPubkey)?;
                    let (first, second) = encode_multisig(self.prefix, chunk, obfuscator)?;
                    Builder::new()
                        .push_int(1)
                        .push_slice(push_bytes(&first).map_err(serialisation)?)
                        .push_slice(push_bytes(&second).map_err(serialisation)?)
                        .push_slice(push_bytes(dust_key).map_err(serialisation)?)
                        .push_int(3)
                        .push_opcode(OP_CHECKMULTISIG)
                        .into_script()
                }
                EncodingScheme::PubKeyHash => {
                    let hash = encode_pubkeyhash(self.prefix, chunk, obfuscator)?;
                    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash))
                }
                EncodingScheme::P2sh | EncodingScheme::Legacy => {
                    return Err(serialisation(format!(
                        "{} data is not serialised as plain outputs",
                        data.scheme
                    )))
                }
            };
            outputs.push(output(script, data.value));
        }
        Ok(outputs)
    }

    /// Single-phase transaction: destinations, data outputs, change
    pub fn serialise(
        &self,
        inputs: &[Utxo],
        destinations: &[(String, u64)],
        data: Option<&DataOutput>,
        change: Option<(&str, u64)>,
        dust_return_pubkey: Option<&[u8]>,
    ) -> ConstructResult<Transaction> {
        let first = inputs
            .first()
            .ok_or_else(|| serialisation("transaction without inputs"))?;
        let obfuscator = Obfuscator::for_first_input(&first.txid);

        let mut outputs = self.address_outputs(destinations)?;
        if let Some(data) = data {
            outputs.extend(self.data_outputs(data, &obfuscator, dust_return_pubkey)?);
        }
        if let Some((address, value)) = change {
            outputs.push(output(self.codec.address_to_script(address)?, value));
        }

        Ok(unsigned_transaction(inputs.iter().map(utxo_input).collect(), outputs))
    }

    /// Funding transaction creating one P2SH output per chunk
    ///
    /// `source_value` returns the destinations' value to the source so the
    /// datatx can spend it.
    pub fn serialise_p2sh_pretx(
        &self,
        inputs: &[Utxo],
        chunks: &[Vec<u8>],
        owner: &DataOwner,
        data_value: u64,
        source_value: Option<(&str, u64)>,
        change: Option<(&str, u64)>,
    ) -> ConstructResult<Transaction> {
        if inputs.is_empty() {
            return Err(serialisation("transaction without inputs").into());
        }
        if chunks.len() > MAX_DATA_CHUNKS {
            return Err(TransactionError::TooManyP2shChunks(chunks.len()).into());
        }

        let mut outputs = Vec::with_capacity(chunks.len() + 2);
        for (index, chunk) in chunks.iter().enumerate() {
            let redeem = make_redeem_script(self.prefix, chunk, index, owner)?;
            outputs.push(output(redeem.to_p2sh(), data_value));
        }
        for (address, value) in source_value.into_iter().chain(change) {
            outputs.push(output(self.codec.address_to_script(address)?, value));
        }

        Ok(unsigned_transaction(inputs.iter().map(utxo_input).collect(), outputs))
    }

    /// Data transaction spending every P2SH output of the pretx
    ///
    /// `source_value_script` is the scriptPubKey of the pretx's source-value
    /// output, spent right after the data inputs. `source_input` is an extra
    /// coin of a P2SH source.
    pub fn serialise_p2sh_datatx(
        &self,
        pretx_txid: &Txid,
        chunks: &[Vec<u8>],
        owner: &DataOwner,
        source_value_script: Option<ScriptBuf>,
        source_input: Option<&Utxo>,
        destinations: &[(String, u64)],
    ) -> ConstructResult<Transaction> {
        let mut inputs = Vec::with_capacity(chunks.len() + 2);
        for (index, chunk) in chunks.iter().enumerate() {
            let redeem = make_redeem_script(self.prefix, chunk, index, owner)?;
            let outpoint = OutPoint {
                txid: *pretx_txid,
                vout: index as u32,
            };
            inputs.push(unsigned_input(outpoint, unsigned_data_script_sig(&redeem)?));
        }
        if let Some(script) = source_value_script {
            let outpoint = OutPoint {
                txid: *pretx_txid,
                vout: chunks.len() as u32,
            };
            inputs.push(unsigned_input(outpoint, script));
        }
        if let Some(utxo) = source_input {
            inputs.push(utxo_input(utxo));
        }

        let obfuscator = Obfuscator::for_first_input(pretx_txid);
        let mut outputs = self.address_outputs(destinations)?;
        outputs.push(output(self.opreturn_script(P2SH_MARKER, &obfuscator)?, 0));

        Ok(unsigned_transaction(inputs, outputs))
    }
}
