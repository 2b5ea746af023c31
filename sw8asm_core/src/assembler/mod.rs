mod emit;
mod expr;
mod lines;
mod literals;
mod preprocess;
mod symbols;
mod tokens;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;

pub use emit::{AssembledProgram, Section};
pub use preprocess::{FileId, IncludeGraph};
pub use symbols::Visibility;

use crate::isa::{InstructionSet, Sw8Isa};

/// What went wrong. Every failure carries exactly one of these; assembly is
/// all-or-nothing and stops at the first error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyLabelDefinition,
    InvalidLabelDefinition(String),
    DuplicateLabelDefinition(String),
    InvalidDirective(String),
    InvalidOperand,
    InvalidStringLiteral,
    UndefinedSymbol(String),
    ExpressionOverflow,
    EncodingUnsupported(String),
    SectionOverlap,
    IncludeNotFound(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::EmptyLabelDefinition => write!(f, "label definition has no name"),
            ErrorKind::InvalidLabelDefinition(text) => {
                write!(f, "invalid label definition '{}'", text)
            }
            ErrorKind::DuplicateLabelDefinition(name) => {
                write!(f, "label '{}' is already defined", name)
            }
            ErrorKind::InvalidDirective(head) => write!(f, "invalid directive '{}'", head),
            ErrorKind::InvalidOperand => write!(f, "invalid operand"),
            ErrorKind::InvalidStringLiteral => write!(f, "malformed string literal"),
            ErrorKind::UndefinedSymbol(name) => write!(f, "undefined symbol '{}'", name),
            ErrorKind::ExpressionOverflow => write!(f, "value does not fit its destination"),
            ErrorKind::EncodingUnsupported(detail) => write!(f, "{}", detail),
            ErrorKind::SectionOverlap => write!(f, "sections overlap"),
            ErrorKind::IncludeNotFound(path) => write!(f, "cannot include '{}'", path),
        }
    }
}

/// A diagnostic positioned at a 1-based line number, relative to the file
/// the offending line came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerError {
    pub kind: ErrorKind,
    pub line: usize,
}

impl AssemblerError {
    pub fn new(kind: ErrorKind, line: usize) -> Self {
        Self { kind, line }
    }
}

impl fmt::Display for AssemblerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

impl std::error::Error for AssemblerError {}

/// Supplies the text of included files. Injected so the core stays free of
/// filesystem assumptions.
pub trait IncludeResolver {
    fn resolve(&self, path: &str) -> Option<String>;
}

/// Resolver for sources that use no includes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIncludes;

impl IncludeResolver for NoIncludes {
    fn resolve(&self, _path: &str) -> Option<String> {
        None
    }
}

/// In-memory resolver, mainly for tests.
#[derive(Debug, Default)]
pub struct MapResolver {
    files: HashMap<String, String>,
}

impl MapResolver {
    pub fn insert(&mut self, path: &str, source: &str) {
        self.files.insert(path.to_string(), source.to_string());
    }
}

impl IncludeResolver for MapResolver {
    fn resolve(&self, path: &str) -> Option<String> {
        self.files.get(path).cloned()
    }
}

/// Assembles a self-contained source with the built-in SW8 encoding table.
pub fn assemble(source: &str) -> Result<AssembledProgram, AssemblerError> {
    assemble_with(source, &Sw8Isa, &NoIncludes)
}

/// Assembles with an injected encoding table and include resolver.
pub fn assemble_with(
    source: &str,
    isa: &dyn InstructionSet,
    includes: &dyn IncludeResolver,
) -> Result<AssembledProgram, AssemblerError> {
    let (stream, graph) = preprocess::expand(source, includes)?;
    emit::run(&stream, &graph, isa)
}
