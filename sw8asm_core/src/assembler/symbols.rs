use std::collections::HashMap;
use std::str::FromStr;

use strum::{Display, EnumString};

use super::preprocess::FileId;
use super::{AssemblerError, ErrorKind};

/// Controls which including files may reference a label.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    /// Referencable from the defining file only.
    Private,
    /// Referencable from the defining file and its direct includers.
    Protected,
    /// Referencable from any transitive includer of the defining file.
    Public,
}

#[derive(Debug)]
pub struct Label {
    pub visibility: Visibility,
    pub line: usize,
    pub file: FileId,
    pub address: Option<u16>,
}

/// Parses the text before a label line's trailing colon.
///
/// An optional visibility keyword may precede the name, separated by
/// whitespace; without one the label is Private. The name must match
/// `[A-Za-z_][A-Za-z0-9._]*`.
pub fn parse_definition(text: &str, line: usize) -> Result<(Visibility, &str), AssemblerError> {
    if text.is_empty() {
        return Err(AssemblerError::new(ErrorKind::EmptyLabelDefinition, line));
    }

    let (visibility, name) = match text.rfind(char::is_whitespace) {
        Some(i) => {
            let keyword = text[..i].trim_end();
            let visibility = Visibility::from_str(keyword).map_err(|_| {
                AssemblerError::new(ErrorKind::InvalidLabelDefinition(text.to_string()), line)
            })?;
            (visibility, &text[i + 1..])
        }
        None => (Visibility::Private, text),
    };

    if !is_valid_name(name) {
        return Err(AssemblerError::new(
            ErrorKind::InvalidLabelDefinition(text.to_string()),
            line,
        ));
    }
    Ok((visibility, name))
}

pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

/// Label definitions accumulated during pass one and consulted by both
/// passes. Names are case-sensitive and unique per compilation unit.
#[derive(Debug, Default)]
pub struct SymbolTable {
    labels: HashMap<String, Label>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and records a label definition with its resolved address.
    pub fn define(
        &mut self,
        text: &str,
        line: usize,
        file: FileId,
        address: u16,
    ) -> Result<(), AssemblerError> {
        let (visibility, name) = parse_definition(text, line)?;

        if self.labels.contains_key(name) {
            // reported at the second (offending) definition's line
            return Err(AssemblerError::new(
                ErrorKind::DuplicateLabelDefinition(name.to_string()),
                line,
            ));
        }

        self.labels.insert(
            name.to_string(),
            Label {
                visibility,
                line,
                file,
                address: Some(address),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Label> {
        self.labels.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Label)> {
        self.labels.iter()
    }
}
