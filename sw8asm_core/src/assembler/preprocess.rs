use std::collections::HashMap;
use std::str::FromStr;

use strum::EnumString;

use super::expr::{self, Eval, Lookup};
use super::lines::{self, SourceLine};
use super::symbols::{self, Visibility};
use super::tokens::{self, Stmt};
use super::{AssemblerError, ErrorKind, IncludeResolver};

/// Identifies the file a line originated from; 0 is the root source.
pub type FileId = usize;

/// Which files include which, accumulated during expansion. Pass two
/// consults it to enforce label visibility.
#[derive(Debug, Default)]
pub struct IncludeGraph {
    names: Vec<String>,
    edges: Vec<(FileId, FileId)>,
}

impl IncludeGraph {
    fn root() -> Self {
        Self {
            names: vec![String::new()],
            edges: Vec::new(),
        }
    }

    fn add_file(&mut self, includer: FileId, name: &str) -> FileId {
        let id = self.names.len();
        self.names.push(name.to_string());
        self.edges.push((includer, id));
        id
    }

    pub fn name(&self, file: FileId) -> &str {
        &self.names[file]
    }

    /// Whether a reference in `from` may bind to a label defined in `def`.
    pub fn allows(&self, from: FileId, def: FileId, visibility: Visibility) -> bool {
        if from == def {
            return true;
        }
        match visibility {
            Visibility::Private => false,
            Visibility::Protected => self.edges.contains(&(from, def)),
            Visibility::Public => self.reachable(from, def),
        }
    }

    fn reachable(&self, from: FileId, to: FileId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.names.len()];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if seen[node] {
                continue;
            }
            seen[node] = true;
            for &(includer, included) in &self.edges {
                if includer == node {
                    stack.push(included);
                }
            }
        }
        false
    }
}

/// One line of the expanded stream handed to the two passes. Macro body
/// lines keep their definition-site line and file.
#[derive(Debug, PartialEq, Eq)]
pub struct ExpandedLine {
    pub kind: LineKind,
    pub line: usize,
    pub file: FileId,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LineKind {
    Label(String),
    Op { head: String, operands: Vec<String> },
}

#[derive(EnumString, Clone, Copy, PartialEq, Eq, Debug)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
enum Directive {
    Org,
    Db,
    Dw,
    Include,
    Macro,
    Endmacro,
    If,
    Elif,
    Else,
    Endif,
    Define,
}

impl Directive {
    /// Heads are accepted with or without a leading dot; a dotted head that
    /// names no directive is an error rather than a mnemonic candidate.
    fn recognize(head: &str, line: usize) -> Result<Option<Self>, AssemblerError> {
        match head.strip_prefix('.') {
            Some(name) => match Self::from_str(name) {
                Ok(directive) => Ok(Some(directive)),
                Err(_) => Err(AssemblerError::new(
                    ErrorKind::InvalidDirective(head.to_string()),
                    line,
                )),
            },
            None => Ok(Self::from_str(head).ok()),
        }
    }
}

struct MacroDef {
    params: Vec<String>,
    body: Vec<(String, usize)>,
    file: FileId,
}

struct ConditionalFrame {
    taken: bool,
    any_taken: bool,
    parent_active: bool,
    seen_else: bool,
}

#[derive(Default)]
struct FileState {
    conditionals: Vec<ConditionalFrame>,
    capture: Option<(String, usize)>,
}

impl FileState {
    fn active(&self) -> bool {
        self.conditionals.iter().all(|f| f.parent_active && f.taken)
    }
}

/// Expands includes, conditionals, macros, and defines into a flat line
/// stream plus the include graph built along the way.
pub fn expand(
    source: &str,
    resolver: &dyn IncludeResolver,
) -> Result<(Vec<ExpandedLine>, IncludeGraph), AssemblerError> {
    let mut expander = Expander {
        resolver,
        graph: IncludeGraph::root(),
        macros: HashMap::new(),
        defines: HashMap::new(),
        output: Vec::new(),
        include_stack: Vec::new(),
        expansion_stack: Vec::new(),
    };
    expander.expand_file(source, 0)?;
    Ok((expander.output, expander.graph))
}

struct Expander<'r> {
    resolver: &'r dyn IncludeResolver,
    graph: IncludeGraph,
    macros: HashMap<String, MacroDef>,
    defines: HashMap<String, String>,
    output: Vec<ExpandedLine>,
    include_stack: Vec<String>,
    expansion_stack: Vec<String>,
}

impl Expander<'_> {
    fn expand_file(&mut self, source: &str, file: FileId) -> Result<(), AssemblerError> {
        let mut state = FileState::default();

        for line in lines::logical_lines(source) {
            self.process(&line, file, &mut state)?;
        }

        // every .if and .macro must close within its own file
        if !state.conditionals.is_empty() {
            return Err(AssemblerError::new(
                ErrorKind::InvalidDirective(".if".to_string()),
                source.lines().count(),
            ));
        }
        if state.capture.is_some() {
            return Err(AssemblerError::new(
                ErrorKind::InvalidDirective(".macro".to_string()),
                source.lines().count(),
            ));
        }
        Ok(())
    }

    fn process(
        &mut self,
        line: &SourceLine,
        file: FileId,
        state: &mut FileState,
    ) -> Result<(), AssemblerError> {
        if state.capture.is_some() {
            return self.capture_body_line(line, state);
        }

        let stmt = tokens::tokenize(line)?;
        let op = match stmt {
            Stmt::Label { text, line } => {
                if state.active() {
                    self.output.push(ExpandedLine {
                        kind: LineKind::Label(text.to_string()),
                        line,
                        file,
                    });
                }
                return Ok(());
            }
            Stmt::Operation(op) => op,
        };

        let directive = Directive::recognize(op.head, op.line)?;

        // conditional directives are tracked even in skipped regions so
        // nesting stays balanced
        match directive {
            Some(Directive::If) => return self.begin_if(&op, state),
            Some(Directive::Elif) => return self.continue_if(&op, state, false),
            Some(Directive::Else) => return self.continue_if(&op, state, true),
            Some(Directive::Endif) => {
                return match state.conditionals.pop() {
                    Some(_) => Ok(()),
                    None => Err(self.bad_directive(op.head, op.line)),
                };
            }
            _ => {}
        }

        if !state.active() {
            return Ok(());
        }

        let operands: Vec<String> = op
            .operands
            .iter()
            .map(|span| substitute(span, &self.defines))
            .collect();

        match directive {
            Some(Directive::Macro) => self.begin_macro(&operands, op.line, file, state),
            Some(Directive::Endmacro) => Err(self.bad_directive(op.head, op.line)),
            Some(Directive::Define) => self.record_define(line, op.line),
            Some(Directive::Include) => self.include(&operands, op.line, file),
            Some(Directive::Org) | Some(Directive::Db) | Some(Directive::Dw) => {
                let head = op.head.strip_prefix('.').unwrap_or(op.head);
                self.output.push(ExpandedLine {
                    kind: LineKind::Op {
                        head: head.to_ascii_lowercase(),
                        operands,
                    },
                    line: op.line,
                    file,
                });
                Ok(())
            }
            Some(_) => unreachable!("conditionals handled above"),
            None if self.macros.contains_key(op.head) => {
                self.invoke_macro(op.head, &operands, op.line, state)
            }
            None => {
                self.output.push(ExpandedLine {
                    kind: LineKind::Op {
                        head: op.head.to_string(),
                        operands,
                    },
                    line: op.line,
                    file,
                });
                Ok(())
            }
        }
    }

    fn bad_directive(&self, head: &str, line: usize) -> AssemblerError {
        AssemblerError::new(ErrorKind::InvalidDirective(head.to_string()), line)
    }

    fn begin_if(
        &mut self,
        op: &tokens::TokenizedLine,
        state: &mut FileState,
    ) -> Result<(), AssemblerError> {
        let parent_active = state.active();
        let taken = if parent_active {
            self.condition(op)?
        } else {
            false
        };
        state.conditionals.push(ConditionalFrame {
            taken,
            any_taken: taken,
            parent_active,
            seen_else: false,
        });
        Ok(())
    }

    fn continue_if(
        &mut self,
        op: &tokens::TokenizedLine,
        state: &mut FileState,
        is_else: bool,
    ) -> Result<(), AssemblerError> {
        let parent_active = state
            .conditionals
            .last()
            .map(|f| f.parent_active)
            .ok_or_else(|| self.bad_directive(op.head, op.line))?;
        let taken = {
            let frame = state.conditionals.last().expect("frame exists");
            if frame.seen_else {
                return Err(self.bad_directive(op.head, op.line));
            }
            if !parent_active || frame.any_taken {
                false
            } else if is_else {
                true
            } else {
                self.condition(op)?
            }
        };
        let frame = state.conditionals.last_mut().expect("frame exists");
        frame.taken = taken;
        frame.any_taken |= taken;
        frame.seen_else = is_else;
        Ok(())
    }

    fn condition(&mut self, op: &tokens::TokenizedLine) -> Result<bool, AssemblerError> {
        if op.operands.len() != 1 {
            return Err(self.bad_directive(op.head, op.line));
        }
        let span = substitute(op.operands[0], &self.defines);
        match expr::evaluate(&span, op.line, &mut |_| Lookup::Undefined)? {
            Eval::Value(value) => Ok(value != 0.into()),
            Eval::Deferred => unreachable!("lookup never defers"),
        }
    }

    fn begin_macro(
        &mut self,
        operands: &[String],
        line: usize,
        file: FileId,
        state: &mut FileState,
    ) -> Result<(), AssemblerError> {
        if !self.expansion_stack.is_empty() {
            return Err(self.bad_directive(".macro", line));
        }
        let [header] = operands else {
            return Err(self.bad_directive(".macro", line));
        };

        let mut parts = header.split_whitespace();
        let name = parts
            .next()
            .filter(|n| symbols::is_valid_name(n))
            .ok_or_else(|| self.bad_directive(".macro", line))?;
        let params: Vec<String> = parts.map(str::to_string).collect();
        if params.iter().any(|p| !symbols::is_valid_name(p)) {
            return Err(self.bad_directive(".macro", line));
        }
        if self.macros.contains_key(name) {
            return Err(self.bad_directive(".macro", line));
        }

        self.macros.insert(
            name.to_string(),
            MacroDef {
                params,
                body: Vec::new(),
                file,
            },
        );
        state.capture = Some((name.to_string(), line));
        Ok(())
    }

    fn capture_body_line(
        &mut self,
        line: &SourceLine,
        state: &mut FileState,
    ) -> Result<(), AssemblerError> {
        let head = line.text.split_whitespace().next().unwrap_or("");
        match Directive::recognize(head, line.number) {
            Ok(Some(Directive::Endmacro)) => {
                state.capture = None;
                return Ok(());
            }
            Ok(Some(Directive::Macro)) => {
                // macro definitions do not nest
                return Err(self.bad_directive(head, line.number));
            }
            _ => {}
        }

        let (name, _) = state.capture.as_ref().expect("capturing");
        self.macros
            .get_mut(name)
            .expect("macro was just defined")
            .body
            .push((line.text.to_string(), line.number));
        Ok(())
    }

    fn invoke_macro(
        &mut self,
        name: &str,
        args: &[String],
        line: usize,
        state: &mut FileState,
    ) -> Result<(), AssemblerError> {
        if self.expansion_stack.iter().any(|n| n == name) {
            // direct or indirect self-invocation
            return Err(self.bad_directive(name, line));
        }

        let def = &self.macros[name];
        if args.len() != def.params.len() {
            return Err(AssemblerError::new(ErrorKind::InvalidOperand, line));
        }

        let bindings: HashMap<String, String> = def
            .params
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();
        let body: Vec<(String, usize)> = def
            .body
            .iter()
            .map(|(text, line)| (substitute(text, &bindings), *line))
            .collect();
        let def_file = def.file;

        self.expansion_stack.push(name.to_string());
        for (text, body_line) in &body {
            let source_line = SourceLine {
                text,
                number: *body_line,
            };
            self.process(&source_line, def_file, state)?;
        }
        self.expansion_stack.pop();
        Ok(())
    }

    fn record_define(&mut self, line: &SourceLine, number: usize) -> Result<(), AssemblerError> {
        // re-split from the raw text: the replacement may contain commas
        let rest = line
            .text
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim_start())
            .unwrap_or("");
        let (name, replacement) = match rest.split_once(char::is_whitespace) {
            Some((name, replacement)) => (name, replacement.trim_start()),
            None => (rest, ""),
        };
        if !symbols::is_valid_name(name) {
            return Err(self.bad_directive(".define", number));
        }
        self.defines
            .insert(name.to_string(), substitute(replacement, &self.defines));
        Ok(())
    }

    fn include(
        &mut self,
        operands: &[String],
        line: usize,
        file: FileId,
    ) -> Result<(), AssemblerError> {
        let [path] = operands else {
            return Err(self.bad_directive(".include", line));
        };
        let path = unquote(path);

        if self.include_stack.iter().any(|p| p == path) {
            // include cycle
            return Err(self.bad_directive(".include", line));
        }
        let Some(source) = self.resolver.resolve(path) else {
            return Err(AssemblerError::new(
                ErrorKind::IncludeNotFound(path.to_string()),
                line,
            ));
        };

        let id = self.graph.add_file(file, path);
        self.include_stack.push(path.to_string());
        self.expand_file(&source, id)?;
        self.include_stack.pop();
        Ok(())
    }
}

fn unquote(text: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return inner;
        }
    }
    text
}

/// Replaces whole identifiers that match a binding; partial matches inside
/// longer identifiers are left alone.
fn substitute(text: &str, bindings: &HashMap<String, String>) -> String {
    if bindings.is_empty() {
        return text.to_string();
    }

    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '.' || c == '_';
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(is_ident) {
        let end = rest[start..]
            .find(|c| !is_ident(c))
            .map(|i| start + i)
            .unwrap_or(rest.len());
        out.push_str(&rest[..start]);
        let run = &rest[start..end];
        match bindings.get(run) {
            Some(replacement) => out.push_str(replacement),
            None => out.push_str(run),
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}
