//! Rock-paper-scissors resolution (message type 81)
//!
//! Reveals a player's move and the random nonce committed to when the game
//! was opened. Wire layout after the type id (big-endian):
//!
//! | bytes  | field                     |
//! |--------|---------------------------|
//! | 0-1    | move (u16)                |
//! | 2-17   | random nonce              |
//! | 18-49  | tx0 hash of the match     |
//! | 50-81  | tx1 hash of the match     |

use crate::errors::{ComposeError, DecodeError};
use crate::transaction::TxRequest;
use crate::types::counterparty::{pack_message_type, TypeIdFormat};
use crate::types::CounterpartyMessageType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use tracing::warn;

pub const ID: u32 = CounterpartyMessageType::RpsResolve as u32;
pub const LENGTH: usize = 2 + 16 + 32 + 32;

const RANDOM_SIZE: usize = 16;
/// Below this many blocks before expiry a resolution may not confirm in time
const EXPIRY_WARNING_BLOCKS: i64 = 4;

/// Decoded resolution body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsResolve {
    pub game_move: u16,
    pub random: [u8; RANDOM_SIZE],
    pub tx0_hash: [u8; 32],
    pub tx1_hash: [u8; 32],
}

impl RpsResolve {
    /// `<tx0 hash>_<tx1 hash>`
    pub fn rps_match_id(&self) -> String {
        make_id(&hex::encode(self.tx0_hash), &hex::encode(self.tx1_hash))
    }

    pub fn random_hex(&self) -> String {
        hex::encode(self.random)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut data = pack_message_type(ID, TypeIdFormat::Short);
        data.reserve(LENGTH);
        // Writes into a Vec cannot fail
        let _ = data.write_u16::<BigEndian>(self.game_move);
        data.extend_from_slice(&self.random);
        data.extend_from_slice(&self.tx0_hash);
        data.extend_from_slice(&self.tx1_hash);
        data
    }
}

/// Match state as recorded by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsMatch {
    pub id: String,
    pub tx0_address: String,
    pub tx1_address: String,
    pub tx0_move_random_hash: String,
    pub tx1_move_random_hash: String,
    pub possible_moves: u16,
    pub status: String,
    pub match_expire_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Player {
    First,
    Second,
}

impl Player {
    pub fn other(self) -> Self {
        match self {
            Player::First => Player::Second,
            Player::Second => Player::First,
        }
    }

    fn ordinal(self) -> &'static str {
        match self {
            Player::First => "first",
            Player::Second => "second",
        }
    }
}

/// A valid resolution already accepted into the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMove {
    pub game_move: u16,
    pub tx_index: u64,
}

/// Outcome of [`validate`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Validation {
    /// Which side of the match the source plays, once known
    pub player: Option<Player>,
    pub problems: Vec<String>,
}

fn make_id(tx0_hash: &str, tx1_hash: &str) -> String {
    format!("{}_{}", tx0_hash, tx1_hash)
}

fn parse_id(rps_match_id: &str) -> Option<([u8; 32], [u8; 32])> {
    let (tx0, tx1) = rps_match_id.split_once('_')?;
    let tx0: [u8; 32] = hex::decode(tx0).ok()?.try_into().ok()?;
    let tx1: [u8; 32] = hex::decode(tx1).ok()?.try_into().ok()?;
    Some((tx0, tx1))
}

/// Hex of the double SHA-256 commitment `random || move`
pub fn move_random_hash(game_move: u16, random: &[u8]) -> String {
    let mut preimage = random.to_vec();
    preimage.extend_from_slice(&game_move.to_be_bytes());
    let once = Sha256::digest(&preimage);
    hex::encode(Sha256::digest(once))
}

/// Check a resolution against the match it claims to resolve
///
/// Problems are accumulated in the order a user would want to fix them;
/// structural problems stop the check early.
pub fn validate(
    source: &str,
    game_move: u16,
    random: &str,
    rps_match: Option<&RpsMatch>,
) -> Validation {
    let mut validation = Validation::default();

    if !random.chars().all(|c| c.is_ascii_hexdigit()) {
        validation
            .problems
            .push("random must be an hexadecimal string".to_string());
        return validation;
    }
    let random_bytes = match hex::decode(random) {
        Ok(bytes) if bytes.len() == RANDOM_SIZE => bytes,
        _ => {
            validation
                .problems
                .push("random must be 16 bytes in hexadecimal format".to_string());
            return validation;
        }
    };

    let Some(rps_match) = rps_match else {
        validation.problems.push("no such rps match".to_string());
        return validation;
    };

    if game_move < 1 {
        validation
            .problems
            .push("move must be greater than 0".to_string());
    } else if game_move > rps_match.possible_moves {
        validation.problems.push(format!(
            "move must be lower than {}",
            rps_match.possible_moves
        ));
    }

    let (player, committed, open_statuses) = if source == rps_match.tx0_address {
        (
            Player::First,
            &rps_match.tx0_move_random_hash,
            ["pending", "pending and resolved"],
        )
    } else if source == rps_match.tx1_address {
        (
            Player::Second,
            &rps_match.tx1_move_random_hash,
            ["pending", "resolved and pending"],
        )
    } else {
        validation
            .problems
            .push("invalid source address".to_string());
        return validation;
    };
    validation.player = Some(player);

    if *committed != move_random_hash(game_move, &random_bytes) {
        validation
            .problems
            .push("invalid move or random value".to_string());
        return validation;
    }

    let status = rps_match.status.as_str();
    if status == "expired" {
        validation.problems.push("rps match expired".to_string());
    } else if status.starts_with("concluded") {
        validation.problems.push("rps match concluded".to_string());
    } else if status.starts_with("invalid") {
        validation.problems.push("rps match invalid".to_string());
    } else if !open_statuses.contains(&status) {
        validation.problems.push("rps already resolved".to_string());
    }

    validation
}

/// Build the `(source, no destinations, data)` request for a resolution
pub fn compose(
    source: &str,
    game_move: u16,
    random: &str,
    rps_match_id: &str,
    rps_match: Option<&RpsMatch>,
    current_block_index: u32,
) -> Result<TxRequest, ComposeError> {
    let (tx0_hash, tx1_hash) = parse_id(rps_match_id)
        .ok_or_else(|| ComposeError(vec![format!("invalid rps match id {}", rps_match_id)]))?;

    let validation = validate(source, game_move, random, rps_match);
    if !validation.problems.is_empty() {
        return Err(ComposeError(validation.problems));
    }
    let Some(rps_match) = rps_match else {
        return Err(ComposeError(vec!["no such rps match".to_string()]));
    };

    let time_left = i64::from(rps_match.match_expire_index) - i64::from(current_block_index);
    if time_left < EXPIRY_WARNING_BLOCKS {
        warn!(
            "Only {} blocks until that rps match expires. The conclusion might not make into the blockchain in time.",
            time_left
        );
    }

    let random: [u8; RANDOM_SIZE] = hex::decode(random)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| ComposeError(vec!["random must be 16 bytes in hexadecimal format".to_string()]))?;

    let message = RpsResolve {
        game_move,
        random,
        tx0_hash,
        tx1_hash,
    };
    Ok(TxRequest::new(source).with_data(message.pack()))
}

/// Decode a resolution body (the bytes after the type id)
pub fn unpack(message: &[u8]) -> Result<RpsResolve, DecodeError> {
    if message.len() != LENGTH {
        return Err(DecodeError::new("could not unpack"));
    }
    let mut cursor = Cursor::new(message);
    let read = |cursor: &mut Cursor<&[u8]>| -> std::io::Result<RpsResolve> {
        let game_move = cursor.read_u16::<BigEndian>()?;
        let mut random = [0u8; RANDOM_SIZE];
        cursor.read_exact(&mut random)?;
        let mut tx0_hash = [0u8; 32];
        cursor.read_exact(&mut tx0_hash)?;
        let mut tx1_hash = [0u8; 32];
        cursor.read_exact(&mut tx1_hash)?;
        Ok(RpsResolve {
            game_move,
            random,
            tx0_hash,
            tx1_hash,
        })
    };
    read(&mut cursor).map_err(|_| DecodeError::new("could not unpack"))
}

/// Unpack and validate a resolution seen on chain
///
/// Returns the message (when it unpacked) and its ledger status: `valid`, or
/// `invalid: ...` with the problems joined by `; `.
pub fn parse(
    source: &str,
    message: &[u8],
    rps_match: Option<&RpsMatch>,
) -> (Option<RpsResolve>, Option<Player>, String) {
    let resolve = match unpack(message) {
        Ok(resolve) => resolve,
        Err(e) => return (None, None, format!("invalid: {}", e)),
    };
    let validation = validate(source, resolve.game_move, &resolve.random_hex(), rps_match);
    if validation.problems.is_empty() {
        (Some(resolve), validation.player, "valid".to_string())
    } else {
        let status = format!("invalid: {}", validation.problems.join("; "));
        (Some(resolve), None, status)
    }
}

/// Winner of two revealed moves, by `tx_index`; `None` is a tie
///
/// Generalised rock-paper-scissors: a move beats lower moves of the same
/// parity and higher moves of the other parity.
pub fn resolve_game(first: &ResolvedMove, second: &ResolvedMove) -> Option<u64> {
    let same_parity = first.game_move % 2 == second.game_move % 2;
    if (same_parity && first.game_move < second.game_move)
        || (!same_parity && first.game_move > second.game_move)
    {
        Some(first.tx_index)
    } else if (same_parity && first.game_move > second.game_move)
        || (!same_parity && first.game_move < second.game_move)
    {
        Some(second.tx_index)
    } else {
        None
    }
}

/// Match status after `player` resolves with `resolution`
///
/// `counter` is the other player's accepted resolution; it is required once
/// both sides have revealed, otherwise `None` is returned.
pub fn next_match_status(
    current_status: &str,
    player: Player,
    resolution: &ResolvedMove,
    counter: Option<&ResolvedMove>,
) -> Option<String> {
    if current_status == "pending" {
        return Some(match player {
            Player::First => "resolved and pending".to_string(),
            Player::Second => "pending and resolved".to_string(),
        });
    }

    let counter = counter?;
    let status = match resolve_game(resolution, counter) {
        None => "concluded: tie".to_string(),
        Some(winner) if winner == counter.tx_index => {
            format!("concluded: {} player wins", player.other().ordinal())
        }
        Some(_) => format!("concluded: {} player wins", player.ordinal()),
    };
    Some(status)
}
