pub(super) const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// ISO-8859-1 maps every byte straight onto the first 256 code points.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

/// Splits on a fixed end-of-line marker, dropping the empty tail after a final marker.
pub fn split_lines<'a>(text: &'a str, eol: &str) -> Vec<&'a str> {
    let mut lines: Vec<&str> = text.split(eol).collect();
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Storage-safe column name: lowercase, punctuation and whitespace become `_`.
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
