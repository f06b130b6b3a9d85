//! NNTP command builders, request parsing and response parsing
//!
//! Builders produce the lines an outbound feed sends; [`Request`] is what an
//! inbound session parses from its peer.

pub mod request;
pub mod response;

pub use request::*;
pub use response::*;

/// Build QUIT command
pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// Build CAPABILITIES command (RFC 3977 §5.2)
///
/// Response is multi-line, starting with 101.
pub fn capabilities() -> &'static str {
    "CAPABILITIES\r\n"
}

/// Build MODE READER command (RFC 3977 §5.3)
///
/// Used transiently by a feed to pull one article with `ARTICLE`.
pub fn mode_reader() -> &'static str {
    "MODE READER\r\n"
}

/// Build MODE STREAM command (RFC 4644 Section 2.3)
///
/// Response is 203 on success.
pub fn mode_stream() -> &'static str {
    "MODE STREAM\r\n"
}

/// Build ARTICLE command for a message-id (reader mode only)
pub fn article(message_id: &str) -> String {
    format!("ARTICLE {}\r\n", message_id)
}

/// Build CHECK command (RFC 4644 Section 2.4)
///
/// Peer responds with:
/// - 238 (CHECK_SEND) - Send the article via TAKETHIS
/// - 431 (CHECK_LATER) - Try again later
/// - 435 / 438 - Article not wanted
/// - 437 - Rejected
///
/// The response includes the message-id for matching in pipelined scenarios.
pub fn check(message_id: &str) -> String {
    format!("CHECK {}\r\n", message_id)
}

/// Build the TAKETHIS command line (RFC 4644 §2.5)
///
/// The dot-stuffed article and the terminating `.` line follow immediately,
/// see [`dot_stuff`].
pub fn takethis(message_id: &str) -> String {
    format!("TAKETHIS {}\r\n", message_id)
}

/// Format a single-line reply (`<code> <message>\r\n`)
pub fn reply(code: u16, message: &str) -> String {
    if message.is_empty() {
        format!("{code}\r\n")
    } else {
        format!("{code} {message}\r\n")
    }
}

/// Convert raw article bytes to wire form
///
/// Line endings are normalised to CRLF, lines beginning with `.` get an extra
/// leading dot, and the `.\r\n` terminator is appended.
pub fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 8);

    if !data.is_empty() {
        let trimmed = data
            .strip_suffix(b"\r\n")
            .or_else(|| data.strip_suffix(b"\n"))
            .unwrap_or(data);
        for line in trimmed.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.starts_with(b".") {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
}
