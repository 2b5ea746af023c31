use std::collections::HashMap;

use bimap::BiBTreeMap;
use ibig::IBig;

use crate::isa::{EncodingError, InstructionSet, Operand, OperandShape, Register};
use crate::utils::ibig_to_le_bytes;

use super::expr::{self, Eval, Lookup};
use super::preprocess::{ExpandedLine, IncludeGraph, LineKind};
use super::symbols::SymbolTable;
use super::{AssemblerError, ErrorKind};

/// A contiguous run of output bytes starting at a fixed address. A new
/// section opens at every `org` that follows emitted bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct Section {
    pub origin: u16,
    pub bytes: Vec<u8>,
    /// Line of the statement that opened the section, for overlap reports.
    pub line: usize,
}

impl Section {
    fn end(&self) -> u32 {
        self.origin as u32 + self.bytes.len() as u32
    }
}

/// The fully assembled output: byte sections, the resolved label addresses,
/// and an address-to-line map covering root-file statements.
#[derive(Debug, Default)]
pub struct AssembledProgram {
    pub sections: Vec<Section>,
    pub symbols: HashMap<String, u16>,
    pub source_map: BiBTreeMap<u16, usize>,
}

impl AssembledProgram {
    /// True when the source produced no output bytes and no labels, e.g. a
    /// file of nothing but comments and blank lines.
    pub fn is_effectively_empty(&self) -> bool {
        self.sections.is_empty() && self.symbols.is_empty()
    }
}

const ADDRESS_SPACE: u32 = 1 << 16;

/// Runs both passes over the expanded line stream.
pub fn run(
    stream: &[ExpandedLine],
    graph: &IncludeGraph,
    isa: &dyn InstructionSet,
) -> Result<AssembledProgram, AssemblerError> {
    let (table, predicted) = measure(stream, graph, isa)?;
    generate(stream, graph, isa, &table, &predicted)
}

/// Pass one: assign every label an address by advancing the location
/// counter by each statement's encoded length. Lengths depend only on the
/// mnemonic and operand shapes, never operand values, so forward references
/// cannot change them.
fn measure(
    stream: &[ExpandedLine],
    graph: &IncludeGraph,
    isa: &dyn InstructionSet,
) -> Result<(SymbolTable, Vec<u32>), AssemblerError> {
    let mut table = SymbolTable::new();
    let mut pc: u32 = 0;
    let mut predicted = vec![0u32; stream.len()];

    for (index, entry) in stream.iter().enumerate() {
        let (head, operands) = match &entry.kind {
            LineKind::Label(text) => {
                // pc may legally sit one past the last address, but no label
                // can live there
                if pc >= ADDRESS_SPACE {
                    return Err(AssemblerError::new(ErrorKind::ExpressionOverflow, entry.line));
                }
                table.define(text, entry.line, entry.file, pc as u16)?;
                continue;
            }
            LineKind::Op { head, operands } => (head.as_str(), operands.as_slice()),
        };

        let length = match head {
            "org" => {
                pc = origin_of(operands, entry, graph, &table)? as u32;
                continue;
            }
            "db" => data_length(operands, entry.line, 1)?,
            "dw" => data_length(operands, entry.line, 2)?,
            _ => {
                let shapes = classify(operands);
                // syntax-check expression operands; forward references defer
                for span in operands {
                    if Register::parse(span).is_none() {
                        expr::evaluate(span, entry.line, &mut |_| Lookup::Deferred)?;
                    }
                }
                isa.size_of(head, &shapes)
                    .map_err(|e| encoding_error(e, entry.line))?
            }
        };

        predicted[index] = length;
        pc += length;
        if pc > ADDRESS_SPACE {
            return Err(AssemblerError::new(ErrorKind::ExpressionOverflow, entry.line));
        }
    }

    Ok((table, predicted))
}

/// Pass two: evaluate every operand against the now-complete symbol table
/// and emit bytes.
fn generate(
    stream: &[ExpandedLine],
    graph: &IncludeGraph,
    isa: &dyn InstructionSet,
    table: &SymbolTable,
    predicted: &[u32],
) -> Result<AssembledProgram, AssemblerError> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section {
        origin: 0,
        bytes: Vec::new(),
        line: 0,
    };
    let mut source_map = BiBTreeMap::new();

    for (index, entry) in stream.iter().enumerate() {
        let (head, operands) = match &entry.kind {
            LineKind::Label(_) => continue,
            LineKind::Op { head, operands } => (head.as_str(), operands.as_slice()),
        };

        let mut lookup = |name: &str| resolve(name, entry.file, graph, table);

        let emitted = match head {
            "org" => {
                let origin = origin_of(operands, entry, graph, table)?;
                if current.bytes.is_empty() {
                    current.origin = origin;
                    current.line = entry.line;
                } else {
                    sections.push(current);
                    current = Section {
                        origin,
                        bytes: Vec::new(),
                        line: entry.line,
                    };
                }
                continue;
            }
            "db" => data_bytes(operands, entry.line, 1, &mut lookup)?,
            "dw" => data_bytes(operands, entry.line, 2, &mut lookup)?,
            _ => {
                let mut values: Vec<Option<IBig>> = Vec::with_capacity(operands.len());
                for span in operands {
                    if Register::parse(span).is_some() {
                        values.push(None);
                    } else {
                        match expr::evaluate(span, entry.line, &mut lookup)? {
                            Eval::Value(value) => values.push(Some(value)),
                            Eval::Deferred => unreachable!("pass two never defers"),
                        }
                    }
                }
                let resolved: Vec<Operand> = operands
                    .iter()
                    .zip(&values)
                    .map(|(span, value)| match value {
                        Some(value) => Operand::Value(value),
                        None => Operand::Register(
                            Register::parse(span).expect("classified as register"),
                        ),
                    })
                    .collect();
                isa.encode(head, &resolved)
                    .map_err(|e| encoding_error(e, entry.line))?
            }
        };

        // pass one must have predicted this exact length
        assert_eq!(
            emitted.len() as u32,
            predicted[index],
            "pass length mismatch at line {}",
            entry.line
        );

        if entry.file == 0 && !emitted.is_empty() {
            let address = current.origin.wrapping_add(current.bytes.len() as u16);
            source_map.insert(address, entry.line);
        }
        current.bytes.extend_from_slice(&emitted);
    }

    if !current.bytes.is_empty() {
        sections.push(current);
    }
    check_overlap(&sections)?;

    let symbols = table
        .iter()
        .filter_map(|(name, label)| label.address.map(|a| (name.clone(), a)))
        .collect();

    Ok(AssembledProgram {
        sections,
        symbols,
        source_map,
    })
}

fn resolve(name: &str, from: usize, graph: &IncludeGraph, table: &SymbolTable) -> Lookup {
    match table.get(name) {
        Some(label) if graph.allows(from, label.file, label.visibility) => match label.address {
            Some(address) => Lookup::Value(IBig::from(address)),
            None => Lookup::Undefined,
        },
        _ => Lookup::Undefined,
    }
}

/// Evaluates an `org` operand. Only labels already assigned an address may
/// appear; an origin must not depend on code it positions.
fn origin_of(
    operands: &[String],
    entry: &ExpandedLine,
    graph: &IncludeGraph,
    table: &SymbolTable,
) -> Result<u16, AssemblerError> {
    let [span] = operands else {
        return Err(AssemblerError::new(ErrorKind::InvalidOperand, entry.line));
    };
    let mut lookup = |name: &str| resolve(name, entry.file, graph, table);
    let value = match expr::evaluate(span, entry.line, &mut lookup)? {
        Eval::Value(value) => value,
        Eval::Deferred => unreachable!("lookup never defers"),
    };
    u16::try_from(&value)
        .map_err(|_| AssemblerError::new(ErrorKind::ExpressionOverflow, entry.line))
}

/// Computes the byte length of a `db`/`dw` statement without evaluating
/// expression operands.
fn data_length(operands: &[String], line: usize, width: u32) -> Result<u32, AssemblerError> {
    if operands.is_empty() {
        return Err(AssemblerError::new(ErrorKind::InvalidOperand, line));
    }
    let mut total = 0;
    for span in operands {
        if span.starts_with('"') {
            if width != 1 {
                // strings only belong in byte data
                return Err(AssemblerError::new(ErrorKind::InvalidOperand, line));
            }
            total += string_bytes(span, line)?.len() as u32;
        } else {
            expr::evaluate(span, line, &mut |_| Lookup::Deferred)?;
            total += width;
        }
    }
    Ok(total)
}

fn data_bytes(
    operands: &[String],
    line: usize,
    width: u32,
    lookup: &mut dyn FnMut(&str) -> Lookup,
) -> Result<Vec<u8>, AssemblerError> {
    let mut bytes = Vec::new();
    for span in operands {
        if span.starts_with('"') {
            bytes.extend_from_slice(&string_bytes(span, line)?);
            continue;
        }
        let value = match expr::evaluate(span, line, lookup)? {
            Eval::Value(value) => value,
            Eval::Deferred => unreachable!("pass two never defers"),
        };
        match ibig_to_le_bytes(&value, width as usize) {
            Some(le) => bytes.extend_from_slice(&le),
            None => return Err(AssemblerError::new(ErrorKind::ExpressionOverflow, line)),
        }
    }
    Ok(bytes)
}

/// Decodes a quoted string literal to its output bytes.
fn string_bytes(span: &str, line: usize) -> Result<Vec<u8>, AssemblerError> {
    let malformed = || AssemblerError::new(ErrorKind::InvalidStringLiteral, line);
    let inner = span
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(malformed)?;

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        let c = match c {
            '\\' => expr::unescape(chars.next().ok_or_else(malformed)?),
            '"' => return Err(malformed()), // unescaped interior quote
            c => c,
        };
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }
    Ok(bytes)
}

fn classify(operands: &[String]) -> Vec<OperandShape> {
    operands
        .iter()
        .map(|span| {
            if Register::parse(span).is_some() {
                OperandShape::Register
            } else {
                OperandShape::Expression
            }
        })
        .collect()
}

fn encoding_error(error: EncodingError, line: usize) -> AssemblerError {
    let kind = match error {
        EncodingError::OutOfRange { .. } => ErrorKind::ExpressionOverflow,
        other => ErrorKind::EncodingUnsupported(other.to_string()),
    };
    AssemblerError::new(kind, line)
}

fn check_overlap(sections: &[Section]) -> Result<(), AssemblerError> {
    let mut order: Vec<&Section> = sections.iter().collect();
    order.sort_by_key(|s| s.origin);
    for pair in order.windows(2) {
        if pair[0].end() > pair[1].origin as u32 {
            // blamed on the section placed later in the source
            let line = pair[0].line.max(pair[1].line);
            return Err(AssemblerError::new(ErrorKind::SectionOverlap, line));
        }
    }
    Ok(())
}
