//! Helpers for Minecraft chat text.

use super::ChatProtocolError;

/// Prefix of a two-character formatting code such as `§a`.
pub const FORMAT_MARKER: char = '§';

/// Remove every `§x` formatting code.
pub fn strip_formatting(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == FORMAT_MARKER {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

/// The last formatting code in `raw`, lowercased.
pub fn last_format_code(raw: &str) -> Option<char> {
    let mut code = None;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == FORMAT_MARKER {
            if let Some(next) = chars.next() {
                code = Some(next.to_ascii_lowercase());
            }
        }
    }
    code
}

/// Whether a stripped line is a horizontal rule made only of dashes.
pub fn is_separator(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c == '-')
}

/// Parse a non-negative count printed by the server.
pub(crate) fn parse_count<T: core::str::FromStr>(
    digits: &str,
    line: &str,
) -> Result<T, ChatProtocolError> {
    digits
        .trim()
        .parse()
        .ok()
        .ok_or_else(|| ChatProtocolError::InvalidCount {
            line: line.to_owned(),
        })
}
