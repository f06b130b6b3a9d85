//! Message-ID and newsgroup validation
//!
//! Every identifier that arrives from a peer passes through here before it is
//! used as a store key or a routing key.

use crate::{FeedError, Result};
use chrono::{DateTime, Utc};

/// Shortest possible message-id: `<a@b>`
const MIN_MESSAGE_ID_LEN: usize = 5;

/// Longest message-id we will store
const MAX_MESSAGE_ID_LEN: usize = 250;

/// Longest newsgroup name we will route
const MAX_NEWSGROUP_LEN: usize = 128;

fn is_id_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.'
}

/// Validates a Message-ID (`<local@domain>`)
///
/// - Must start with `<` and end with `>`
/// - Must contain exactly one `@`, with non-empty local and domain parts
/// - Local and domain parts may only contain ASCII alphanumerics and dots
///
/// The id doubles as an on-disk filename, so the character set is kept narrow.
///
/// # Examples
///
/// ```
/// use nntp_feed::validation::validate_message_id;
///
/// assert!(validate_message_id("<a@b>").is_ok());
/// assert!(validate_message_id("<abc123.1@node.example>").is_ok());
/// assert!(validate_message_id("<><><>").is_err());
/// assert!(validate_message_id("<abc123>").is_err());
/// assert!(validate_message_id("<a@b@c>").is_err());
/// ```
pub fn validate_message_id(message_id: &str) -> Result<()> {
    let invalid = || FeedError::InvalidMessageId(message_id.chars().take(100).collect());

    if message_id.len() < MIN_MESSAGE_ID_LEN || message_id.len() > MAX_MESSAGE_ID_LEN {
        return Err(invalid());
    }

    let content = message_id
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .ok_or_else(invalid)?;

    let mut parts = content.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };

    if local.is_empty() || domain.is_empty() {
        return Err(invalid());
    }

    if !local.bytes().all(is_id_char) || !domain.bytes().all(is_id_char) {
        return Err(invalid());
    }

    Ok(())
}

/// Convenience wrapper returning a bool
pub fn is_valid_message_id(message_id: &str) -> bool {
    validate_message_id(message_id).is_ok()
}

/// Validates a newsgroup name (`component.component...`)
///
/// - Components separated by dots, each non-empty
/// - Components may contain ASCII letters, digits, `+`, `-`, `_`
///
/// # Examples
///
/// ```
/// use nntp_feed::validation::validate_newsgroup_name;
///
/// assert!(validate_newsgroup_name("overchan.test").is_ok());
/// assert!(validate_newsgroup_name("ctl").is_ok());
/// assert!(validate_newsgroup_name("overchan..test").is_err());
/// assert!(validate_newsgroup_name(".overchan").is_err());
/// assert!(validate_newsgroup_name("over chan").is_err());
/// ```
pub fn validate_newsgroup_name(newsgroup: &str) -> Result<()> {
    let invalid = |why: &str| FeedError::InvalidNewsgroup(format!("{newsgroup:.100}: {why}"));

    if newsgroup.is_empty() {
        return Err(invalid("empty"));
    }
    if newsgroup.len() > MAX_NEWSGROUP_LEN {
        return Err(invalid("too long"));
    }

    for component in newsgroup.split('.') {
        if component.is_empty() {
            return Err(invalid("empty component"));
        }
        if let Some(ch) = component
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '_')))
        {
            return Err(invalid(&format!("invalid character '{ch}'")));
        }
    }

    Ok(())
}

/// Parses an RFC 5322 date-time string into a `DateTime<Utc>`
///
/// Also accepts the common `GMT` suffix in place of a numeric offset.
pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Ok(dt.with_timezone(&Utc));
    }

    if date_str.contains("GMT") {
        let normalized = date_str.replace("GMT", "+0000");
        if let Ok(dt) = DateTime::parse_from_rfc2822(&normalized) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    Err(FeedError::InvalidArticle(format!(
        "Invalid date format: {date_str:.100}"
    )))
}
