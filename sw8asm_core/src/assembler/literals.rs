use ibig::IBig;

/// Reduces a numeric literal to a canonical (base, digit-run) pair.
///
/// Recognizers run in order: binary, decimal, hexadecimal. Binary markers
/// are checked before hex ones so a span like `0b11h` can never be read as
/// a hex digit run; a binary or hex prefix claims the span outright, and a
/// bad digit run after it makes the span a non-literal rather than falling
/// through to a later recognizer. Returns `None` when the span matches no
/// recognizer; the caller then treats the span as a symbol reference.
pub fn normalize(text: &str) -> Option<(u32, &str)> {
    // binary prefix forms: 0b / 0B / %
    if let Some(digits) = text
        .strip_prefix("0b")
        .or_else(|| text.strip_prefix("0B"))
        .or_else(|| text.strip_prefix('%'))
    {
        return digit_run(digits, 2).map(|d| (2, d));
    }
    // binary suffix form: trailing b/B over 0/1 digits only
    if let Some(digits) = text.strip_suffix(['b', 'B'])
        && digit_run(digits, 2).is_some()
    {
        return Some((2, digits));
    }

    if digit_run(text, 10).is_some() {
        return Some((10, text));
    }

    // hex prefix forms: 0x / 0X / $
    if let Some(digits) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .or_else(|| text.strip_prefix('$'))
    {
        return digit_run(digits, 16).map(|d| (16, d));
    }
    // hex suffix form: trailing h/H
    if let Some(digits) = text.strip_suffix(['h', 'H'])
        && digit_run(digits, 16).is_some()
    {
        return Some((16, digits));
    }

    None
}

/// Parses a numeric literal to its value, if the span is one.
pub fn parse(text: &str) -> Option<IBig> {
    let (base, digits) = normalize(text)?;
    // normalize() already validated the digit run
    IBig::from_str_radix(digits, base).ok()
}

fn digit_run(text: &str, base: u32) -> Option<&str> {
    if !text.is_empty() && text.chars().all(|c| c.is_digit(base)) {
        Some(text)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_conventions_agree() {
        for lit in ["0x1F", "$1F", "1Fh", "0X1F", "1fH"] {
            assert_eq!(parse(lit), Some(IBig::from(31)), "literal {}", lit);
        }
    }

    #[test]
    fn binary_conventions_agree() {
        for lit in ["0b101", "%101", "101b", "0B101", "101B"] {
            assert_eq!(parse(lit), Some(IBig::from(5)), "literal {}", lit);
        }
    }

    #[test]
    fn decimal() {
        assert_eq!(parse("42"), Some(IBig::from(42)));
        assert_eq!(parse("0"), Some(IBig::from(0)));
    }

    #[test]
    fn binary_markers_win_over_hex() {
        // "0b11" must never be read as hex "b11"
        assert_eq!(parse("0b11"), Some(IBig::from(3)));
        // a claimed binary prefix with bad digits is a non-literal, not hex
        assert_eq!(parse("0b11h"), None);
    }

    #[test]
    fn non_literals_are_rejected() {
        for lit in ["1g", "0xG", "", "b", "h", "0b", "$", "x1", "foo", "0b12", "%102"] {
            assert_eq!(parse(lit), None, "literal {}", lit);
        }
    }
}
