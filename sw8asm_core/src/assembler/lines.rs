/// A logical line: original text with comments and surrounding whitespace
/// stripped, plus its 1-based line number in the file it came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SourceLine<'a> {
    pub text: &'a str,
    pub number: usize,
}

/// Splits raw source into logical lines.
///
/// The line-ending convention (LF, CRLF, or CR) is detected from the first
/// terminator encountered and applied uniformly; a source that mixes
/// conventions mid-file is not separately diagnosed. Comment-only and blank
/// lines never become logical lines but still count toward line numbers.
/// An empty result means there was nothing to assemble.
pub fn logical_lines(source: &str) -> Vec<SourceLine<'_>> {
    let terminator = match source.find(['\n', '\r']) {
        Some(i) if source[i..].starts_with("\r\n") => "\r\n",
        Some(i) if source[i..].starts_with('\r') => "\r",
        Some(_) => "\n",
        None => "\n", // single-line source, any terminator works
    };

    let mut lines = Vec::new();
    for (i, physical) in source.split(terminator).enumerate() {
        let content = match physical.split_once(';') {
            Some((before, _)) => before,
            None => physical,
        };
        let content = content.trim();
        if !content.is_empty() {
            lines.push(SourceLine {
                text: content,
                number: i + 1,
            });
        }
    }
    lines
}
