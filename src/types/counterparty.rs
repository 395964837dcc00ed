use serde::{Deserialize, Serialize};

// Core protocol constants
pub const COUNTERPARTY_PREFIX: &[u8] = b"CNTRPRTY"; // 8-byte protocol identifier

/// Marker payload of the OP_RETURN output that signals P2SH-chained data
pub const P2SH_MARKER: &[u8] = b"P2SH";

/// Message type id carried by a dispenser trigger
pub const DISPENSE_ID: u8 = 13;

/// Message type ids understood by the protocol layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterpartyMessageType {
    Send = 0,
    EnhancedSend = 2,
    Mpma = 3,
    Sweep = 4,
    Order = 10,
    BtcPay = 11,
    Dispenser = 12,
    Dispense = 13,
    Issuance = 20,
    Broadcast = 30,
    Bet = 40,
    Dividend = 50,
    Burn = 60,
    Cancel = 70,
    Rps = 80,
    RpsResolve = 81,
    FairMinter = 90,
    FairMint = 91,
    Utxo = 100,
    Attach = 101,
    Detach = 102,
    Destroy = 110,
}

impl CounterpartyMessageType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Send),
            2 => Some(Self::EnhancedSend),
            3 => Some(Self::Mpma),
            4 => Some(Self::Sweep),
            10 => Some(Self::Order),
            11 => Some(Self::BtcPay),
            12 => Some(Self::Dispenser),
            13 => Some(Self::Dispense),
            20..=22 => Some(Self::Issuance),
            30 => Some(Self::Broadcast),
            40 => Some(Self::Bet),
            50 => Some(Self::Dividend),
            60 => Some(Self::Burn),
            70 => Some(Self::Cancel),
            80 => Some(Self::Rps),
            81 => Some(Self::RpsResolve),
            90 => Some(Self::FairMinter),
            91 => Some(Self::FairMint),
            100 => Some(Self::Utxo),
            101 => Some(Self::Attach),
            102 => Some(Self::Detach),
            110 => Some(Self::Destroy),
            _ => None,
        }
    }

    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Wire width of the message type id at the start of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeIdFormat {
    /// Single byte (`>B`), used by every message built today
    Short,
    /// Big-endian u32 (`>I`)
    Long,
}

/// Encode a message type id
///
/// The short form only covers ids 1..=255; anything else falls back to the
/// four byte form.
pub fn pack_message_type(id: u32, format: TypeIdFormat) -> Vec<u8> {
    match format {
        TypeIdFormat::Short if (1..256).contains(&id) => vec![id as u8],
        _ => id.to_be_bytes().to_vec(),
    }
}

/// Split a payload into `(message type id, message body)`
pub fn unpack_message_type(data: &[u8], format: TypeIdFormat) -> Option<(u32, &[u8])> {
    match format {
        TypeIdFormat::Short if data.first().is_some_and(|b| *b > 0) => {
            Some((u32::from(data[0]), &data[1..]))
        }
        _ => {
            let head: [u8; 4] = data.get(..4)?.try_into().ok()?;
            Some((u32::from_be_bytes(head), &data[4..]))
        }
    }
}
