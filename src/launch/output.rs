//! Captured output to plain text
//!
//! Remote sessions run under a pseudo-terminal, so output arrives with
//! carriage returns and control sequences. Some launch scripts also echo a
//! byte-string literal (`b'...'`) instead of the text itself; those are
//! decoded once more.

/// Decode raw output and keep only printable characters
pub fn make_printable(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match decode_bytes_literal(&text) {
        Some(bytes) => filter_printable(&String::from_utf8_lossy(&bytes)),
        None => filter_printable(&text),
    }
}

/// [`make_printable`] applied to each line of a multi-line capture
pub fn make_printable_lines<B: AsRef<[u8]>>(lines: &[B]) -> Vec<String> {
    lines.iter().map(|l| make_printable(l.as_ref())).collect()
}

/// Newlines, tabs, spaces and visible ASCII
fn is_printable(c: char) -> bool {
    c == '\n' || c == '\t' || c == ' ' || c.is_ascii_graphic()
}

pub fn filter_printable(text: &str) -> String {
    text.chars().filter(|&c| is_printable(c)).collect()
}

/// Decode `b'...'` / `b"..."` into its bytes
///
/// Returns `None` when `text` is not exactly one well-formed literal.
pub fn decode_bytes_literal(text: &str) -> Option<Vec<u8>> {
    let text = text.trim_end_matches(['\r', '\n']);
    let body = text.strip_prefix('b')?;
    let quote = body.chars().next().filter(|q| *q == '\'' || *q == '"')?;
    let body = body[1..].strip_suffix(quote)?;

    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            // Unescaped closing quote before the end
            return None;
        }
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            '0' => out.push(0),
            '\\' => out.push(b'\\'),
            '\'' => out.push(b'\''),
            '"' => out.push(b'"'),
            'x' => {
                let hi = chars.next()?.to_digit(16)?;
                let lo = chars.next()?.to_digit(16)?;
                out.push((hi * 16 + lo) as u8);
            }
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_carriage_returns_and_controls() {
        let raw = b"line one\r\nline\x07 two\r\n\x1b[0m";
        assert_eq!(make_printable(raw), "line one\nline two\n[0m");
    }

    #[test]
    fn test_invalid_utf8_is_dropped() {
        assert_eq!(make_printable(b"ok\xff\xfe!\n"), "ok!\n");
    }

    #[test]
    fn test_decodes_bytes_literal() {
        let raw = br"b'Count00: 12\r\nCount01: 13\r\n'";
        assert_eq!(make_printable(raw), "Count00: 12\nCount01: 13\n");

        let raw = b"b\"tab\\there\\x21\"\r\n";
        assert_eq!(make_printable(raw), "tab\there!");
    }

    #[test]
    fn test_malformed_literal_is_plain_text() {
        assert_eq!(decode_bytes_literal("b'open"), None);
        assert_eq!(decode_bytes_literal("b'a' and b'b'"), None);
        assert_eq!(decode_bytes_literal("b'\\q'"), None);
        assert_eq!(decode_bytes_literal("bob"), None);
        assert_eq!(make_printable(b"b'a' and b'b'"), "b'a' and b'b'");
    }

    #[test]
    fn test_lines() {
        let lines: Vec<&[u8]> = vec![b"a\r", br"b'b\n'", b"\x00c"];
        assert_eq!(make_printable_lines(&lines), vec!["a", "b\n", "c"]);
    }
}
