use std::collections::VecDeque;
use std::iter::Peekable;
use std::str::CharIndices;

use ibig::IBig;
use peeking_take_while::PeekableExt;

use super::literals;
use super::{AssemblerError, ErrorKind};

/// Result of evaluating one operand span.
#[derive(Debug, PartialEq, Eq)]
pub enum Eval {
    Value(IBig),
    /// At least one symbol was not resolvable yet (pass one); the span is
    /// syntactically valid and will be re-evaluated in pass two.
    Deferred,
}

/// What the caller knows about a symbol reference.
pub enum Lookup {
    Value(IBig),
    Deferred,
    Undefined,
}

#[derive(PartialEq, Eq, Debug)]
enum RpnKind {
    LParenthesis,
    RParenthesis,
    UnaryMinus,
    Add,
    Subtract,
    Multiply,
    Divide,
    Integer(IBig),
    Symbol(String),
}

#[derive(PartialEq, Eq, Debug)]
enum Associativity {
    Left,
    Right,
}

impl RpnKind {
    fn precedence(&self) -> u32 {
        match *self {
            Self::UnaryMinus => 4,
            Self::Multiply | Self::Divide => 3,
            Self::Add | Self::Subtract => 2,
            _ => 0,
        }
    }

    fn associativity(&self) -> Associativity {
        match *self {
            Self::UnaryMinus => Associativity::Right,
            _ => Associativity::Left,
        }
    }

    fn is_operator(&self) -> bool {
        matches!(
            *self,
            Self::UnaryMinus | Self::Add | Self::Subtract | Self::Multiply | Self::Divide
        )
    }
}

/// Evaluates one operand span as a constant integer expression.
///
/// Supports integer literals in all recognized bases, character literals,
/// symbol references, `+`, `-` (binary and unary), `*`, `/`, and
/// parenthesized grouping. Unary minus binds tighter than any binary
/// operator; `+`/`-` share a precedence level and associate left.
pub fn evaluate(
    span: &str,
    line: usize,
    lookup: &mut dyn FnMut(&str) -> Lookup,
) -> Result<Eval, AssemblerError> {
    let rpn = shunting_yard(scan(span, line)?, line)?;
    eval_rpn(rpn, line, lookup)
}

fn invalid(line: usize) -> AssemblerError {
    AssemblerError::new(ErrorKind::InvalidOperand, line)
}

fn is_atom_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$' || c == '%'
}

fn is_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn scan(span: &str, line: usize) -> Result<Vec<RpnKind>, AssemblerError> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<CharIndices> = span.char_indices().peekable();
    // tracks whether the next token should be an operand, for unary +/-
    let mut expect_operand = true;

    while let Some((i, c)) = chars.next() {
        match c {
            _ if c.is_whitespace() => continue,
            '(' => {
                tokens.push(RpnKind::LParenthesis);
                expect_operand = true;
            }
            ')' => {
                tokens.push(RpnKind::RParenthesis);
                expect_operand = false;
            }
            '+' if expect_operand => {} // unary plus is a no-op
            '+' => {
                tokens.push(RpnKind::Add);
                expect_operand = true;
            }
            '-' => {
                tokens.push(if expect_operand {
                    RpnKind::UnaryMinus
                } else {
                    RpnKind::Subtract
                });
                expect_operand = true;
            }
            '*' if !expect_operand => {
                tokens.push(RpnKind::Multiply);
                expect_operand = true;
            }
            '/' if !expect_operand => {
                tokens.push(RpnKind::Divide);
                expect_operand = true;
            }
            '\'' => {
                tokens.push(RpnKind::Integer(IBig::from(char_literal(&mut chars, line)? as u32)));
                expect_operand = false;
            }
            _ if is_atom_start(c) => {
                let mut end = i + c.len_utf8();
                if let Some(last) = chars
                    .peeking_take_while(|&(_, c)| is_atom_char(c))
                    .map(|(j, c)| j + c.len_utf8())
                    .last()
                {
                    end = last;
                }
                let atom = &span[i..end];
                tokens.push(match literals::parse(atom) {
                    Some(value) => RpnKind::Integer(value),
                    None => RpnKind::Symbol(atom.to_string()),
                });
                expect_operand = false;
            }
            _ => return Err(invalid(line)),
        }
    }

    if tokens.is_empty() {
        return Err(invalid(line));
    }
    Ok(tokens)
}

fn char_literal(chars: &mut Peekable<CharIndices>, line: usize) -> Result<char, AssemblerError> {
    let malformed = AssemblerError::new(ErrorKind::InvalidStringLiteral, line);

    let c = match chars.next() {
        Some((_, '\\')) => match chars.next() {
            Some((_, e)) => unescape(e),
            None => return Err(malformed),
        },
        Some((_, '\'')) | None => return Err(malformed),
        Some((_, c)) => c,
    };

    match chars.next() {
        Some((_, '\'')) => Ok(c),
        _ => Err(malformed),
    }
}

pub(super) fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

fn shunting_yard(tokens: Vec<RpnKind>, line: usize) -> Result<Vec<RpnKind>, AssemblerError> {
    let mut output = VecDeque::new();
    let mut op_stack: VecDeque<RpnKind> = VecDeque::new();

    for token in tokens {
        match token {
            RpnKind::Integer(_) | RpnKind::Symbol(_) => output.push_back(token),
            _ if token.is_operator() => {
                while let Some(top) = op_stack.back() {
                    if *top != RpnKind::LParenthesis
                        && (top.precedence() > token.precedence()
                            || (top.precedence() == token.precedence()
                                && token.associativity() == Associativity::Left))
                    {
                        output.push_back(op_stack.pop_back().expect("stack is not empty"));
                    } else {
                        break;
                    }
                }
                op_stack.push_back(token);
            }
            RpnKind::LParenthesis => op_stack.push_back(token),
            RpnKind::RParenthesis => {
                loop {
                    match op_stack.pop_back() {
                        Some(RpnKind::LParenthesis) => break,
                        Some(op) => output.push_back(op),
                        None => return Err(invalid(line)), // mismatched parenthesis
                    }
                }
            }
            _ => unreachable!(),
        }
    }

    while let Some(op) = op_stack.pop_back() {
        if op == RpnKind::LParenthesis {
            return Err(invalid(line));
        }
        output.push_back(op);
    }

    Ok(output.into())
}

fn eval_rpn(
    rpn: Vec<RpnKind>,
    line: usize,
    lookup: &mut dyn FnMut(&str) -> Lookup,
) -> Result<Eval, AssemblerError> {
    let mut stack: Vec<IBig> = Vec::new();
    let mut deferred = false;

    for kind in rpn {
        match kind {
            RpnKind::Integer(value) => stack.push(value),
            RpnKind::Symbol(name) => match lookup(&name) {
                Lookup::Value(value) => stack.push(value),
                Lookup::Deferred => {
                    deferred = true;
                    stack.push(IBig::from(0));
                }
                Lookup::Undefined => {
                    return Err(AssemblerError::new(ErrorKind::UndefinedSymbol(name), line));
                }
            },
            RpnKind::UnaryMinus => {
                let a = stack.pop().ok_or_else(|| invalid(line))?;
                stack.push(-a);
            }
            op => {
                let b = stack.pop().ok_or_else(|| invalid(line))?;
                let a = stack.pop().ok_or_else(|| invalid(line))?;
                stack.push(match op {
                    RpnKind::Add => a + b,
                    RpnKind::Subtract => a - b,
                    RpnKind::Multiply => a * b,
                    RpnKind::Divide => {
                        if b == IBig::from(0) {
                            // a deferred placeholder may legally be zero here
                            if deferred {
                                IBig::from(0)
                            } else {
                                return Err(invalid(line));
                            }
                        } else {
                            a / b
                        }
                    }
                    _ => unreachable!(),
                });
            }
        }
    }

    if stack.len() != 1 {
        return Err(invalid(line));
    }
    if deferred {
        return Ok(Eval::Deferred);
    }
    Ok(Eval::Value(stack.pop().expect("stack has one value")))
}
