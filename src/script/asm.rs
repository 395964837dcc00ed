//! Script → token sequence
//!
//! Shape matching works on a flat token list rather than raw bytes: small
//! integers (`OP_1`..`OP_16`) become [`Token::Num`], every push (including
//! `OP_0`, the empty push) becomes [`Token::Data`], anything else stays an
//! opcode.

use crate::errors::DecodeError;
use bitcoin::opcodes::all::{OP_PUSHNUM_1, OP_PUSHNUM_16};
use bitcoin::opcodes::Opcode;
use bitcoin::script::Instruction;
use bitcoin::Script;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Op(Opcode),
    Num(u8),
    Data(Vec<u8>),
}

impl Token {
    pub fn is_op(&self, opcode: Opcode) -> bool {
        matches!(self, Token::Op(op) if *op == opcode)
    }

    pub fn is_num(&self, n: u8) -> bool {
        matches!(self, Token::Num(value) if *value == n)
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Token::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<u8> {
        match self {
            Token::Num(n) => Some(*n),
            _ => None,
        }
    }
}

/// Tokenise a script; malformed pushes are a decode failure
pub fn script_to_asm(script: &Script) -> Result<Vec<Token>, DecodeError> {
    let first_num = OP_PUSHNUM_1.to_u8();
    let last_num = OP_PUSHNUM_16.to_u8();

    script
        .instructions()
        .map(|instruction| match instruction {
            Ok(Instruction::PushBytes(bytes)) => Ok(Token::Data(bytes.as_bytes().to_vec())),
            Ok(Instruction::Op(op)) => {
                let code = op.to_u8();
                if (first_num..=last_num).contains(&code) {
                    Ok(Token::Num(code - first_num + 1))
                } else {
                    Ok(Token::Op(op))
                }
            }
            Err(e) => Err(DecodeError::new(format!("invalid script: {}", e))),
        })
        .collect()
}
