mod sw8;

pub use sw8::{Register, Sw8Isa};

use ibig::IBig;

/// Shape of one operand span as seen by the assembler front end.
///
/// The front end only distinguishes register names from constant
/// expressions; whether an expression is an immediate or an address is the
/// encoding table's business, keyed by the mnemonic.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandShape {
    Register,
    Expression,
}

/// A fully evaluated operand, handed to the encoding table in pass two.
#[derive(Debug)]
pub enum Operand<'a> {
    Register(Register),
    Value(&'a IBig),
}

impl Operand<'_> {
    pub fn shape(&self) -> OperandShape {
        match self {
            Operand::Register(_) => OperandShape::Register,
            Operand::Value(_) => OperandShape::Expression,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    UnknownMnemonic(String),
    UnsupportedShapes(String),
    OutOfRange { mnemonic: String, width: u32 },
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::UnknownMnemonic(name) => write!(f, "unknown instruction '{}'", name),
            EncodingError::UnsupportedShapes(name) => {
                write!(f, "unsupported operands for '{}'", name)
            }
            EncodingError::OutOfRange { mnemonic, width } => {
                write!(f, "operand of '{}' does not fit in {} bits", mnemonic, width)
            }
        }
    }
}

/// The instruction-encoding table consumed by the two-pass emitter.
///
/// Pass one asks for byte lengths keyed by mnemonic and operand shapes;
/// pass two asks for the concrete byte pattern given evaluated operands.
/// `size_of` and `encode` must agree on length for every supported
/// mnemonic/shape combination.
pub trait InstructionSet {
    fn size_of(&self, mnemonic: &str, shapes: &[OperandShape]) -> Result<u32, EncodingError>;
    fn encode(&self, mnemonic: &str, operands: &[Operand]) -> Result<Vec<u8>, EncodingError>;
}
