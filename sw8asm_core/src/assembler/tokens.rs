use super::lines::SourceLine;
use super::{AssemblerError, ErrorKind};

/// One tokenized logical line: either a label-definition candidate or a
/// head token (mnemonic or directive) with comma-separated operand spans.
#[derive(Debug, PartialEq, Eq)]
pub enum Stmt<'a> {
    /// Text before the trailing `:`, unvalidated; may carry a visibility
    /// prefix. Validation is the label recognizer's job.
    Label { text: &'a str, line: usize },
    Operation(TokenizedLine<'a>),
}

#[derive(Debug, PartialEq, Eq)]
pub struct TokenizedLine<'a> {
    pub head: &'a str,
    pub operands: Vec<&'a str>,
    pub line: usize,
}

/// Tokenizes one logical line.
///
/// Operand spans keep interior whitespace (multi-term expressions) and are
/// trimmed at the edges only. Commas inside string or character literals do
/// not split operands. An empty span between commas, or after a trailing
/// comma, is an InvalidOperand error.
pub fn tokenize<'a>(line: &SourceLine<'a>) -> Result<Stmt<'a>, AssemblerError> {
    let text = line.text;

    if let Some(label) = text.strip_suffix(':') {
        return Ok(Stmt::Label {
            text: label.trim_end(),
            line: line.number,
        });
    }

    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim_start()),
        None => (text, ""),
    };

    let mut operands = Vec::new();
    if !rest.is_empty() {
        for span in split_operands(rest) {
            let span = span.trim();
            if span.is_empty() {
                return Err(AssemblerError::new(ErrorKind::InvalidOperand, line.number));
            }
            operands.push(span);
        }
    }

    Ok(Stmt::Operation(TokenizedLine {
        head,
        operands,
        line: line.number,
    }))
}

/// Splits on commas that are not inside a `"..."` or `'...'` literal.
fn split_operands(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                ',' => {
                    spans.push(&text[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    spans.push(&text[start..]);
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> SourceLine<'_> {
        SourceLine { text, number: 7 }
    }

    #[test]
    fn head_and_operands() {
        let stmt = tokenize(&line("ldi a, 17 + 6")).unwrap();
        assert_eq!(
            stmt,
            Stmt::Operation(TokenizedLine {
                head: "ldi",
                operands: vec!["a", "17 + 6"],
                line: 7,
            })
        );
    }

    #[test]
    fn label_candidate() {
        assert_eq!(
            tokenize(&line("public loop:")).unwrap(),
            Stmt::Label { text: "public loop", line: 7 }
        );
        assert_eq!(tokenize(&line(":")).unwrap(), Stmt::Label { text: "", line: 7 });
    }

    #[test]
    fn commas_in_strings_do_not_split() {
        let stmt = tokenize(&line(".db \"a,b\", 5")).unwrap();
        assert_eq!(
            stmt,
            Stmt::Operation(TokenizedLine {
                head: ".db",
                operands: vec!["\"a,b\"", "5"],
                line: 7,
            })
        );
    }

    #[test]
    fn empty_operand_span_is_an_error() {
        let err = tokenize(&line("db 1,,2")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOperand);
        assert_eq!(err.line, 7);

        let err = tokenize(&line("db 1,")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOperand);
    }
}
