use serde::{Deserialize, Serialize};

/// A protocol message recovered from (or destined for) a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Source address; hyphen-joined when several distinct inputs count as the source
    pub source: String,
    /// Hyphen-joined destination addresses, empty when there are none
    pub destination: String,
    /// Value paid to the destinations, in satoshis
    pub btc_amount: u64,
    /// Inputs minus outputs, in satoshis
    pub fee: i64,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// One payment to a live dispenser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenserOutput {
    pub destination: String,
    pub btc_amount: u64,
    /// Position among the transaction's dispenser payments
    pub out_index: usize,
}

/// A pure value transfer reinterpreted as a dispenser trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenserTrigger {
    pub source: String,
    pub destination: String,
    pub btc_amount: u64,
    pub fee: i64,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Every triggered dispenser once multiple dispenses are allowed, empty otherwise
    pub outs: Vec<DispenserOutput>,
}

/// Result of decoding one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxInfo {
    Payload(ProtocolMessage),
    DispenserTrigger(DispenserTrigger),
    /// Valid transaction without protocol payload, or one that could not be decoded
    NotAProtocolTx,
}

impl TxInfo {
    pub fn is_protocol_tx(&self) -> bool {
        !matches!(self, TxInfo::NotAProtocolTx)
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            TxInfo::Payload(msg) => Some(&msg.source),
            TxInfo::DispenserTrigger(trigger) => Some(&trigger.source),
            TxInfo::NotAProtocolTx => None,
        }
    }

    pub fn destination(&self) -> Option<&str> {
        match self {
            TxInfo::Payload(msg) => Some(&msg.destination),
            TxInfo::DispenserTrigger(trigger) => Some(&trigger.destination),
            TxInfo::NotAProtocolTx => None,
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        match self {
            TxInfo::Payload(msg) => Some(&msg.data),
            TxInfo::DispenserTrigger(trigger) => Some(&trigger.data),
            TxInfo::NotAProtocolTx => None,
        }
    }

    pub fn fee(&self) -> Option<i64> {
        match self {
            TxInfo::Payload(msg) => Some(msg.fee),
            TxInfo::DispenserTrigger(trigger) => Some(trigger.fee),
            TxInfo::NotAProtocolTx => None,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
