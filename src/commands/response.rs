//! Reply line parsing for outbound sessions

use crate::error::{FeedError, Result};
use crate::response::NntpResponse;

/// Split a reply line into its code and text
///
/// The code must be exactly three digits, followed by a space or the end of
/// the line. A leading byte-order mark is ignored.
pub fn parse_response_line(line: &str) -> Result<(u16, String)> {
    let line = line.trim_start_matches('\u{FEFF}');
    let invalid = || FeedError::InvalidResponse(line.chars().take(100).collect());

    let digits = line.get(..3).ok_or_else(invalid)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let code: u16 = digits.parse().map_err(|_| invalid())?;

    let rest = &line[3..];
    let message = match rest.strip_prefix(' ') {
        Some(text) => text,
        None if rest.is_empty() => "",
        None if rest.starts_with(|c: char| c.is_ascii_digit()) => return Err(invalid()),
        None => rest,
    };

    Ok((code, message.to_string()))
}

/// Parse a single-line reply
pub fn parse_single_response(line: &str) -> Result<NntpResponse> {
    let (code, message) = parse_response_line(line)?;
    Ok(NntpResponse {
        code,
        message,
        lines: Vec::new(),
    })
}
