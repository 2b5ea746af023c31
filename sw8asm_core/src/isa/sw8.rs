use std::str::FromStr;

use ibig::IBig;
use strum::{Display, EnumString};

use super::{EncodingError, InstructionSet, Operand, OperandShape};
use crate::utils::ibig_to_le_bytes;

/// General-purpose registers of the SW8.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Register {
    A,
    B,
    C,
    D,
}

impl Register {
    /// Non-erroring recognizer for operand classification.
    pub fn parse(text: &str) -> Option<Self> {
        Self::from_str(text).ok()
    }

    pub fn index(self) -> u8 {
        match self {
            Register::A => 0,
            Register::B => 1,
            Register::C => 2,
            Register::D => 3,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
enum Mnemonic {
    Nop,
    Hlt,
    Ret,
    Inc,
    Dec,
    Not,
    Push,
    Pop,
    In,
    Out,
    Mov,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Cmp,
    Ldi,
    Ld,
    St,
    Jmp,
    Jz,
    Jnz,
    Jc,
    Jnc,
    Call,
}

/// Operand signature of a mnemonic. Registers occupy one byte each,
/// immediates one byte, addresses two bytes little-endian.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Signature {
    None,
    Reg,
    RegReg,
    RegImm8,
    RegAddr16,
    Addr16,
}

impl Mnemonic {
    fn signature(self) -> Signature {
        match self {
            Mnemonic::Nop | Mnemonic::Hlt | Mnemonic::Ret => Signature::None,
            Mnemonic::Inc
            | Mnemonic::Dec
            | Mnemonic::Not
            | Mnemonic::Push
            | Mnemonic::Pop
            | Mnemonic::In
            | Mnemonic::Out => Signature::Reg,
            Mnemonic::Mov
            | Mnemonic::Add
            | Mnemonic::Sub
            | Mnemonic::And
            | Mnemonic::Or
            | Mnemonic::Xor
            | Mnemonic::Cmp => Signature::RegReg,
            Mnemonic::Ldi => Signature::RegImm8,
            Mnemonic::Ld | Mnemonic::St => Signature::RegAddr16,
            Mnemonic::Jmp
            | Mnemonic::Jz
            | Mnemonic::Jnz
            | Mnemonic::Jc
            | Mnemonic::Jnc
            | Mnemonic::Call => Signature::Addr16,
        }
    }

    fn opcode(self) -> u8 {
        match self {
            Mnemonic::Nop => 0x00,
            Mnemonic::Hlt => 0x01,
            Mnemonic::Ret => 0x02,
            Mnemonic::Inc => 0x10,
            Mnemonic::Dec => 0x11,
            Mnemonic::Not => 0x12,
            Mnemonic::Push => 0x13,
            Mnemonic::Pop => 0x14,
            Mnemonic::In => 0x15,
            Mnemonic::Out => 0x16,
            Mnemonic::Mov => 0x20,
            Mnemonic::Add => 0x21,
            Mnemonic::Sub => 0x22,
            Mnemonic::And => 0x23,
            Mnemonic::Or => 0x24,
            Mnemonic::Xor => 0x25,
            Mnemonic::Cmp => 0x26,
            Mnemonic::Ldi => 0x30,
            Mnemonic::Ld => 0x31,
            Mnemonic::St => 0x32,
            Mnemonic::Jmp => 0x40,
            Mnemonic::Jz => 0x41,
            Mnemonic::Jnz => 0x42,
            Mnemonic::Jc => 0x43,
            Mnemonic::Jnc => 0x44,
            Mnemonic::Call => 0x45,
        }
    }
}

impl Signature {
    fn shapes(self) -> &'static [OperandShape] {
        use OperandShape::*;
        match self {
            Signature::None => &[],
            Signature::Reg => &[Register],
            Signature::RegReg => &[Register, Register],
            Signature::RegImm8 => &[Register, Expression],
            Signature::RegAddr16 => &[Register, Expression],
            Signature::Addr16 => &[Expression],
        }
    }

    fn size(self) -> u32 {
        match self {
            Signature::None => 1,
            Signature::Reg | Signature::RegReg => 2,
            Signature::RegImm8 | Signature::Addr16 => 3,
            Signature::RegAddr16 => 4,
        }
    }
}

/// The built-in SW8 encoding table.
pub struct Sw8Isa;

fn expect_register(operand: &Operand, mnemonic: Mnemonic) -> Result<Register, EncodingError> {
    match operand {
        Operand::Register(r) => Ok(*r),
        Operand::Value(_) => Err(EncodingError::UnsupportedShapes(mnemonic.to_string())),
    }
}

fn expect_value<'a>(operand: &'a Operand, mnemonic: Mnemonic) -> Result<&'a IBig, EncodingError> {
    match operand {
        Operand::Value(v) => Ok(v),
        Operand::Register(_) => Err(EncodingError::UnsupportedShapes(mnemonic.to_string())),
    }
}

fn value_bytes(value: &IBig, width: usize, mnemonic: Mnemonic) -> Result<Vec<u8>, EncodingError> {
    ibig_to_le_bytes(value, width).ok_or(EncodingError::OutOfRange {
        mnemonic: mnemonic.to_string(),
        width: width as u32 * 8,
    })
}

impl InstructionSet for Sw8Isa {
    fn size_of(&self, mnemonic: &str, shapes: &[OperandShape]) -> Result<u32, EncodingError> {
        let mnemonic = Mnemonic::from_str(mnemonic)
            .map_err(|_| EncodingError::UnknownMnemonic(mnemonic.to_string()))?;
        let signature = mnemonic.signature();
        if shapes != signature.shapes() {
            return Err(EncodingError::UnsupportedShapes(mnemonic.to_string()));
        }
        Ok(signature.size())
    }

    fn encode(&self, mnemonic: &str, operands: &[Operand]) -> Result<Vec<u8>, EncodingError> {
        let mnemonic = Mnemonic::from_str(mnemonic)
            .map_err(|_| EncodingError::UnknownMnemonic(mnemonic.to_string()))?;
        let signature = mnemonic.signature();

        let shapes: Vec<OperandShape> = operands.iter().map(Operand::shape).collect();
        if shapes != signature.shapes() {
            return Err(EncodingError::UnsupportedShapes(mnemonic.to_string()));
        }

        let mut bytes = vec![mnemonic.opcode()];
        match signature {
            Signature::None => {}
            Signature::Reg => {
                bytes.push(expect_register(&operands[0], mnemonic)?.index());
            }
            Signature::RegReg => {
                let dst = expect_register(&operands[0], mnemonic)?;
                let src = expect_register(&operands[1], mnemonic)?;
                bytes.push((dst.index() << 4) | src.index());
            }
            Signature::RegImm8 => {
                bytes.push(expect_register(&operands[0], mnemonic)?.index());
                bytes.extend(value_bytes(expect_value(&operands[1], mnemonic)?, 1, mnemonic)?);
            }
            Signature::RegAddr16 => {
                bytes.push(expect_register(&operands[0], mnemonic)?.index());
                bytes.extend(value_bytes(expect_value(&operands[1], mnemonic)?, 2, mnemonic)?);
            }
            Signature::Addr16 => {
                bytes.extend(value_bytes(expect_value(&operands[0], mnemonic)?, 2, mnemonic)?);
            }
        }

        Ok(bytes)
    }
}
